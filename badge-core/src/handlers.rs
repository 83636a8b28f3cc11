//! Built-in command handlers

use badge_proto::{CommandId, ErrorKind, TOKEN_SIZE};
use log::*;

use crate::codec;
use crate::dispatch::{CommandContext, Dispatcher, Origin, Reply};
use crate::error::CommandError;
use crate::state::{MAX_ANIMATIONS, MAX_OWNER_LEN, MAX_PATTERN_LEN, MAX_PATTERNS};

pub const BRIGHTNESS_STEP: u8 = 16;

type HandlerResult = Result<Reply, CommandError>;

/// Register every command the badge answers.
///
/// Image upload and download (`EinkNewImage`, `EinkRemoveImage`,
/// `EinkGetCurrentImg`) belong to the display and stay unregistered here.
pub fn register_builtin(dispatcher: &mut Dispatcher) {
    dispatcher.command(CommandId::Ping, |_ctx| Ok(Reply::empty()));
    dispatcher.command(CommandId::SetToken, set_token);

    dispatcher.command(CommandId::EinkClear, eink_clear);
    dispatcher.command(CommandId::EinkSelectImage, eink_select_image);
    dispatcher.command(CommandId::EinkGetCurrentImgName, |ctx| {
        Reply::payload(ctx.state.current_image.as_bytes())
    });

    dispatcher.command(CommandId::FactoryReset, factory_reset);
    dispatcher.command(CommandId::SetOwner, |ctx| {
        ctx.state.owner = text_arg(ctx.args, MAX_OWNER_LEN)?;
        Ok(Reply::empty())
    });
    dispatcher.command(CommandId::SetContact, |ctx| {
        ctx.state.contact = text_arg(ctx.args, MAX_OWNER_LEN)?;
        Ok(Reply::empty())
    });
    dispatcher.command(CommandId::GetOwner, |ctx| Reply::payload(ctx.state.owner.as_bytes()));
    dispatcher.command(CommandId::GetContact, |ctx| Reply::payload(ctx.state.contact.as_bytes()));

    dispatcher.command(CommandId::FirmwareUpdate, firmware_update);
    dispatcher.command(CommandId::UpdateStatus, |ctx| {
        Reply::payload(&ctx.updater.report().to_bytes())
    });

    dispatcher.command(CommandId::LedBorderSetEnable, |ctx| {
        ctx.state.led.enabled = match ctx.args {
            [0] => false,
            [1] => true,
            _ => return Err(CommandError::invalid_param("enable takes a single 0 or 1")),
        };
        Ok(Reply::empty())
    });
    dispatcher.command(CommandId::LedBorderGetEnable, |ctx| {
        Reply::payload(&[ctx.state.led.enabled as u8])
    });
    dispatcher.command(CommandId::LedBorderIncBrightness, |ctx| {
        let led = &mut ctx.state.led;
        led.brightness = led.brightness.saturating_add(BRIGHTNESS_STEP);
        Reply::payload(&[led.brightness])
    });
    dispatcher.command(CommandId::LedBorderDecBrightness, |ctx| {
        let led = &mut ctx.state.led;
        led.brightness = led.brightness.saturating_sub(BRIGHTNESS_STEP);
        Reply::payload(&[led.brightness])
    });
    dispatcher.command(CommandId::LedBorderSetBrightness, |ctx| {
        let [value] = ctx.args else {
            return Err(CommandError::invalid_param("brightness takes one byte"));
        };
        ctx.state.led.brightness = *value;
        Ok(Reply::empty())
    });
    dispatcher.command(CommandId::LedBorderGetBrightness, |ctx| {
        Reply::payload(&[ctx.state.led.brightness])
    });
    dispatcher.command(CommandId::LedBorderClear, |ctx| {
        ctx.state.led.patterns.clear();
        ctx.state.led.animations.clear();
        Ok(Reply::empty())
    });

    dispatcher.command(CommandId::LedBorderAddPattern, add_pattern);
    dispatcher.command(CommandId::LedBorderRemovePattern, |ctx| {
        let index = index_arg(ctx.args, ctx.state.led.patterns.len())?;
        ctx.state.led.patterns.remove(index);
        Ok(Reply::empty())
    });
    dispatcher.command(CommandId::LedBorderClearPatterns, |ctx| {
        ctx.state.led.patterns.clear();
        Ok(Reply::empty())
    });
    dispatcher.command(CommandId::LedBorderGetPatterns, |ctx| {
        let patterns = &ctx.state.led.patterns;
        let mut trailer = Vec::new();
        for pattern in patterns {
            trailer.extend_from_slice(&(pattern.len() as u16).to_le_bytes());
            trailer.extend_from_slice(pattern);
        }
        Ok(Reply::payload(&[patterns.len() as u8])?.with_trailer(trailer))
    });

    dispatcher.command(CommandId::LedBorderAddAnimation, |ctx| {
        if ctx.args.is_empty() {
            return Err(CommandError::invalid_param("empty animation"));
        }
        let animations = &mut ctx.state.led.animations;
        if animations.len() >= MAX_ANIMATIONS {
            return Err(CommandError::new(ErrorKind::NoMoreMemory, "animation table full"));
        }
        animations.push(ctx.args.to_vec());
        Reply::payload(&[(animations.len() - 1) as u8])
    });
    dispatcher.command(CommandId::LedBorderRemoveAnimation, |ctx| {
        let index = index_arg(ctx.args, ctx.state.led.animations.len())?;
        ctx.state.led.animations.remove(index);
        Ok(Reply::empty())
    });
    dispatcher.command(CommandId::LedBorderClearAnimations, |ctx| {
        ctx.state.led.animations.clear();
        Ok(Reply::empty())
    });
    dispatcher.command(CommandId::LedBorderGetAnimations, |ctx| {
        let animations = &ctx.state.led.animations;
        let mut trailer = Vec::new();
        for animation in animations {
            trailer.push(animation.len() as u8);
            trailer.extend_from_slice(animation);
        }
        Ok(Reply::payload(&[animations.len() as u8])?.with_trailer(trailer))
    });
}

/// UTF-8 argument, trailing nulls from C clients dropped
fn text_arg(args: &[u8], max: usize) -> Result<String, CommandError> {
    let end = args.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    let args = &args[..end];
    if args.len() > max {
        return Err(CommandError::new(
            ErrorKind::DataTooLong,
            format!("{} bytes, at most {max}", args.len()),
        ));
    }
    String::from_utf8(args.to_vec()).map_err(|_| CommandError::invalid_param("not UTF-8"))
}

fn index_arg(args: &[u8], len: usize) -> Result<usize, CommandError> {
    match args {
        [index] if (*index as usize) < len => Ok(*index as usize),
        [index] => Err(CommandError::new(
            ErrorKind::InvalidIndex,
            format!("index {index} out of {len}"),
        )),
        _ => Err(CommandError::invalid_param("index takes one byte")),
    }
}

fn set_token(ctx: &mut CommandContext<'_>) -> HandlerResult {
    let token = ctx.args;
    if token.is_empty() || token.len() > TOKEN_SIZE {
        return Err(CommandError::invalid_param("token must be 1 to 16 bytes"));
    }
    let mut padded = [0u8; TOKEN_SIZE];
    padded[..token.len()].copy_from_slice(token);
    ctx.state.token = padded;
    info!("session token changed");
    Ok(Reply::empty())
}

fn eink_clear(ctx: &mut CommandContext<'_>) -> HandlerResult {
    ctx.state.current_image.clear();
    Ok(Reply::empty())
}

fn eink_select_image(ctx: &mut CommandContext<'_>) -> HandlerResult {
    let name = text_arg(ctx.args, badge_proto::COMMAND_ARGS_SIZE)?;
    if name.is_empty() {
        return Err(CommandError::new(ErrorKind::ImgNameUpdateFail, "empty image name"));
    }
    ctx.state.current_image = name;
    Ok(Reply::empty())
}

fn factory_reset(ctx: &mut CommandContext<'_>) -> HandlerResult {
    warn!("factory reset requested ({:?})", ctx.origin);
    ctx.state.factory_reset();
    Ok(Reply::empty())
}

/// The 312-byte header follows the request on the link; the image follows
/// the response and is read by the update worker.
fn firmware_update(ctx: &mut CommandContext<'_>) -> HandlerResult {
    if ctx.origin == Origin::Local {
        return Err(CommandError::new(
            ErrorKind::InvalidCommandReq,
            "updates are only taken from a connected peer",
        ));
    }
    let timeout = ctx.device.config.request_timeout();
    let header = codec::read_update_header(&mut *ctx.transport, timeout)?;
    let source = ctx.transport.data_channel()?;
    ctx.updater.request_update(&header, source)?;
    Ok(Reply::empty())
}

/// `u16` length in the arguments, pattern bytes streamed after the request
fn add_pattern(ctx: &mut CommandContext<'_>) -> HandlerResult {
    let [lo, hi, ..] = ctx.args else {
        return Err(CommandError::invalid_param("pattern length missing"));
    };
    let len = u16::from_le_bytes([*lo, *hi]) as usize;
    if len == 0 {
        return Err(CommandError::invalid_param("empty pattern"));
    }

    let timeout = ctx.device.config.request_timeout();

    // Drain refused patterns too, so the link stays framed.
    let refusal = if len > MAX_PATTERN_LEN {
        Some(CommandError::new(
            ErrorKind::DataTooLong,
            format!("pattern of {len} bytes, at most {MAX_PATTERN_LEN}"),
        ))
    } else if ctx.state.led.patterns.len() >= MAX_PATTERNS {
        Some(CommandError::new(ErrorKind::NoMoreMemory, "pattern table full"))
    } else {
        None
    };
    if let Some(refusal) = refusal {
        let mut scratch = [0u8; 64];
        let mut left = len;
        while left > 0 {
            let n = left.min(scratch.len());
            ctx.transport.read_exact(&mut scratch[..n], timeout)?;
            left -= n;
        }
        return Err(refusal);
    }

    let mut pattern = vec![0u8; len];
    ctx.transport.read_exact(&mut pattern, timeout)?;
    let patterns = &mut ctx.state.led.patterns;
    patterns.push(pattern);
    Reply::payload(&[(patterns.len() - 1) as u8])
}
