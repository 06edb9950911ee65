//! Text command grammar for the socket service.

use std::num::IntErrorKind;

use crate::core::rates::{MAX_DAYS, MIN_DAYS};

pub const UNKNOWN_COMMAND: &str = "Unknown command";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Rates for the last `days` days, already clamped to the valid range.
    Exchange { days: i64 },
    Unknown,
}

impl Command {
    /// `exchange` means one day; `exchange <n>` clamps `n` into 1..=10.
    /// Anything else, including a non-integer day count, is unknown.
    pub fn parse(line: &str) -> Command {
        let mut parts = line.split_whitespace();
        if parts.next() != Some("exchange") {
            return Command::Unknown;
        }

        match (parts.next(), parts.next()) {
            (None, _) => Command::Exchange { days: MIN_DAYS },
            (Some(arg), None) => match parse_days(arg) {
                Some(days) => Command::Exchange { days },
                None => Command::Unknown,
            },
            (Some(_), Some(_)) => Command::Unknown,
        }
    }
}

fn parse_days(arg: &str) -> Option<i64> {
    match arg.parse::<i64>() {
        Ok(days) => Some(days.clamp(MIN_DAYS, MAX_DAYS)),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(MAX_DAYS),
            IntErrorKind::NegOverflow => Some(MIN_DAYS),
            _ => None,
        },
    }
}
