//! Async peer for a badge listening on TCP

use std::time::Duration;

use badge_proto::async_io::{read_record, read_response, write_request, write_update_header};
use badge_proto::{
    CommandId, CommandRequest, CommandResponse, ErrorKind, UpdateStatusReport, TOKEN_SIZE,
};
use log::*;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::package::Package;

/// Image bytes written per call while streaming an update
const STREAM_CHUNK: usize = 4096;

pub struct Client {
    stream: TcpStream,
    token: [u8; TOKEN_SIZE],
    timeout: Duration,
}

impl Client {
    pub async fn connect(addr: &str, token: [u8; TOKEN_SIZE], timeout: Duration) -> anyhow::Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| anyhow::anyhow!("timed out connecting to {addr}"))??;
        stream.set_nodelay(true)?;
        debug!("connected to {}", addr);
        Ok(Self { stream, token, timeout })
    }

    async fn request(&mut self, identifier: u32, args: &[u8], stream: &[u8]) -> anyhow::Result<()> {
        let request = CommandRequest::new(identifier, self.token, args)?;
        write_request(&mut self.stream, &request).await?;
        if !stream.is_empty() {
            self.stream.write_all(stream).await?;
            self.stream.flush().await?;
        }
        Ok(())
    }

    async fn response(&mut self) -> anyhow::Result<CommandResponse> {
        tokio::time::timeout(self.timeout, read_response(&mut self.stream))
            .await
            .map_err(|_| anyhow::anyhow!("badge did not answer within {:?}", self.timeout))?
            .map_err(Into::into)
    }

    /// Send one command, with `stream` written right after the frame
    pub async fn command(&mut self, identifier: u32, args: &[u8], stream: &[u8]) -> anyhow::Result<CommandResponse> {
        self.request(identifier, args, stream).await?;
        self.response().await
    }

    /// Read the records a list command streams after a successful response
    pub async fn records(&mut self, response: &CommandResponse, wide_length: bool) -> anyhow::Result<Vec<Vec<u8>>> {
        let count = response.payload.first().copied().unwrap_or(0);
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let record = tokio::time::timeout(self.timeout, read_record(&mut self.stream, wide_length))
                .await
                .map_err(|_| anyhow::anyhow!("record stream stalled"))??;
            records.push(record);
        }
        Ok(records)
    }

    pub async fn update_status(&mut self) -> anyhow::Result<UpdateStatusReport> {
        let response = self.command(CommandId::UpdateStatus.id(), &[], &[]).await?;
        check(&response)?;
        Ok(UpdateStatusReport::from_bytes(&response.payload)?)
    }

    /// Hand the header to the badge and stream the image once it accepts
    pub async fn start_update(&mut self, package: &Package) -> anyhow::Result<()> {
        self.request(CommandId::FirmwareUpdate.id(), &[], &[]).await?;
        write_update_header(&mut self.stream, &package.header).await?;
        check(&self.response().await?)?;

        let total = package.image.len();
        let mut sent = 0;
        for chunk in package.image.chunks(STREAM_CHUNK) {
            self.stream.write_all(chunk).await?;
            sent += chunk.len();
            trace!("streamed {}/{} bytes", sent, total);
        }
        self.stream.flush().await?;
        info!("streamed {} image bytes", total);
        Ok(())
    }

    /// Poll UPDATE_STATUS until the attempt settles
    pub async fn wait_update(&mut self, interval: Duration, mut on_progress: impl FnMut(&UpdateStatusReport)) -> anyhow::Result<UpdateStatusReport> {
        loop {
            let report = self.update_status().await?;
            on_progress(&report);
            if report.state.is_terminal() {
                return Ok(report);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

pub fn check(response: &CommandResponse) -> anyhow::Result<()> {
    if response.status.is_ok() {
        Ok(())
    } else {
        anyhow::bail!("badge answered {}", response.status)
    }
}

/// Interpret a raw status code from an update report
pub fn status_name(code: u32) -> String {
    match ErrorKind::try_from(code) {
        Ok(kind) => kind.to_string(),
        Err(code) => format!("unknown status {code}"),
    }
}
