//! Line-based stand-in for the badge's buttons and menu
//!
//! Each stdin line becomes a local command, queued like a menu action.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver};

use badge_proto::CommandId;
use log::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Command { identifier: u32, args: Vec<u8> },
    Status,
    Quit,
}

fn command(id: CommandId, args: &[u8]) -> ConsoleCommand {
    ConsoleCommand::Command { identifier: id.id(), args: args.to_vec() }
}

pub fn parse(line: &str) -> anyhow::Result<ConsoleCommand> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    Ok(match word {
        "ping" => command(CommandId::Ping, &[]),
        "owner" => command(CommandId::SetOwner, rest.as_bytes()),
        "contact" => command(CommandId::SetContact, rest.as_bytes()),
        "image" => command(CommandId::EinkSelectImage, rest.as_bytes()),
        "clear" => command(CommandId::EinkClear, &[]),
        "brighter" => command(CommandId::LedBorderIncBrightness, &[]),
        "dimmer" => command(CommandId::LedBorderDecBrightness, &[]),
        "led" => match rest {
            "on" => command(CommandId::LedBorderSetEnable, &[1]),
            "off" => command(CommandId::LedBorderSetEnable, &[0]),
            other => anyhow::bail!("led takes on|off, got {other:?}"),
        },
        "reset" => command(CommandId::FactoryReset, &[]),
        "status" => ConsoleCommand::Status,
        "quit" | "exit" => ConsoleCommand::Quit,
        "cmd" => {
            let (id, hex) = rest.split_once(' ').unwrap_or((rest, ""));
            let identifier = id.parse()?;
            let args = data_encoding::HEXLOWER_PERMISSIVE.decode(hex.trim().as_bytes())?;
            ConsoleCommand::Command { identifier, args }
        }
        other => anyhow::bail!("unknown console command {other:?}"),
    })
}

/// Read stdin on its own thread; EOF counts as `quit`.
pub fn spawn() -> Receiver<ConsoleCommand> {
    let (tx, rx) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse(&line) {
                    Ok(cmd) => {
                        if tx.send(cmd).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("{}", e),
                }
            }
            let _ = tx.send(ConsoleCommand::Quit);
        });
    if let Err(e) = spawned {
        warn!("console disabled: {}", e);
    }
    rx
}
