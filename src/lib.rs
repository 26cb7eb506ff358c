//! Control core for a multi-feeder Automatic Material System (AMS).
//!
//! Ties together per-feeder hardware state machines ([`feeder`]), pressure-
//! sensor load tracking ([`ps`]), redundant-lane bookkeeping ([`lane_group`]),
//! runout failover ([`runout`]), clog detection ([`clog`]), and the
//! coordinator ([`coordinator`]) that drives them all from one cooperative
//! tick loop.

pub mod clog;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod feeder;
pub mod host;
pub mod lane_group;
pub mod mcu;
pub mod ps;
pub mod ring;
pub mod runout;

pub use command::{Command, CommandAck, CommandOutcome, Origin, TicketId};
pub use config::Config;
pub use coordinator::Coordinator;
pub use error::{AmsError, ErrorKind};
pub use host::Host;
pub use mcu::McuLink;
