// src/command.rs - gcode-level command surface (spec §6, §7, §8)
use crate::error::AmsError;
use crate::mcu::Direction;

/// Opaque handle for a command whose resolution is reported later via
/// `Host::respond` rather than returned synchronously (spec §9's
/// resolution of the "blocking gcode handler" tension).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TicketId(pub u64);

/// Who asked for an operation to happen, used to decide whether an
/// exhausted retry pauses the print (spec §8's worked scenario: an
/// operator-issued unload that fails does not pause; a runout-triggered
/// reload that fails does).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Operator,
    Runout { lane: String },
}

/// A parsed gcode-level request (spec §6's command table).
///
/// `LoadBay`/`Unload`/`SetFollower` are the lower-level, already-resolved
/// form (a specific feeder and bay); `LoadSpool`/`UnloadSpool`/`Follower`
/// are the gcode-level form keyed by pressure-sensor (`FPS`) name, which
/// the coordinator resolves to a concrete feeder/bay before delegating to
/// the lower-level operation. `Status`/`Calibrate` are not feeder/bay
/// scoped the same way and stay as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LoadBay { feeder: String, bay: u8 },
    Unload { feeder: String },
    SetFollower { feeder: String, enable: bool, direction: Direction },
    Status { feeder: Option<String> },
    Calibrate { kind: String },

    /// `OAMS_LOAD_SPOOL FPS=name GROUP=name? LANE=name?`. `group`/`lane`
    /// name the same thing (a lane group) - both accepted as alternate
    /// spellings of the same parameter. When neither is given, any lane
    /// group containing a member fed by `fps` is eligible.
    LoadSpool {
        fps: String,
        group: Option<String>,
        lane: Option<String>,
    },
    /// `OAMS_UNLOAD_SPOOL FPS=name`.
    UnloadSpool { fps: String },
    /// `OAMS_FOLLOWER FPS=name ENABLE=0|1 DIRECTION=0|1`.
    Follower { fps: String, enable: bool, direction: Direction },
    /// `SET_RUNOUT LANE=name RUNOUT=name`. `member` is `None` for
    /// `RUNOUT=NONE`, which clears a previously set override.
    SetRunout { lane: String, member: Option<(String, u8)> },
}

/// The small set of exit codes the gcode surface reports (spec §6).
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Ok,
    Busy,
    NotReady,
    /// `OAMS_FOLLOWER`'s `NOT_LOADED` exit: no spool is loaded under this
    /// pressure sensor to apply the follower setting to.
    NotLoaded,
    LoadFailed(AmsError),
    UnloadFailed(AmsError),
    Failed(AmsError),
    Status(String),
}

/// What issuing a `Command` immediately produces.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandAck {
    /// The outcome was decided synchronously, within this tick.
    Done(CommandOutcome),
    /// The operation is in flight; its resolution arrives later via
    /// `Coordinator::take_completed` and is surfaced through
    /// `Host::respond`.
    Accepted(TicketId),
}

/// A `Command` accepted for asynchronous resolution, tracked by the
/// coordinator until its feeder state machine (C2) resolves.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub ticket: TicketId,
    pub feeder: String,
    pub origin: Origin,
}

fn parse_direction(params: &std::collections::HashMap<&str, &str>) -> Direction {
    match params.get("DIRECTION").copied() {
        Some("1") => Direction::Reverse,
        _ => Direction::Forward,
    }
}

fn parse_member(group: &str, token: &str) -> Result<(String, u8), AmsError> {
    crate::config::parse_member_token(group, token).map_err(|e| AmsError::UnknownName(e.to_string()))
}

/// Parse one gcode-style command line. Parameters are whitespace-separated
/// `KEY=VALUE` tokens.
pub fn parse_gcode(line: &str) -> Result<Command, AmsError> {
    let mut parts = line.split_whitespace();
    let name = parts.next().ok_or_else(|| AmsError::UnknownName(line.to_string()))?;

    let mut params: std::collections::HashMap<&str, &str> = std::collections::HashMap::new();
    for token in parts {
        if let Some((k, v)) = token.split_once('=') {
            params.insert(k, v);
        }
    }

    let required = |key: &str| -> Result<String, AmsError> {
        params
            .get(key)
            .map(|s| s.to_string())
            .ok_or_else(|| AmsError::UnknownName(format!("missing {key}=")))
    };

    if name == "OAMS_LOAD_SPOOL" {
        return Ok(Command::LoadSpool {
            fps: required("FPS")?,
            group: params.get("GROUP").map(|s| s.to_string()),
            lane: params.get("LANE").map(|s| s.to_string()),
        });
    }
    if name == "OAMS_UNLOAD_SPOOL" {
        return Ok(Command::UnloadSpool { fps: required("FPS")? });
    }
    if name == "OAMS_FOLLOWER" {
        let enable = matches!(params.get("ENABLE").copied(), Some("1") | Some("true"));
        return Ok(Command::Follower {
            fps: required("FPS")?,
            enable,
            direction: parse_direction(&params),
        });
    }
    if name == "SET_RUNOUT" {
        let lane = required("LANE")?;
        let runout = required("RUNOUT")?;
        let member = if runout.eq_ignore_ascii_case("NONE") {
            None
        } else {
            Some(parse_member(&lane, &runout)?)
        };
        return Ok(Command::SetRunout { lane, member });
    }
    if let Some(kind) = name.strip_prefix("OAMS_CALIBRATE_") {
        return Ok(Command::Calibrate { kind: kind.to_lowercase() });
    }

    Err(AmsError::UnknownName(name.to_string()))
}
