//! ESP302 ASCII command encoding and reply decoding.
//!
//! Commands are `{address}{mnemonic}{argument}` followed by CR LF, e.g.
//! `1PA12.500000`, `1PA?`, `1OR`. Replies are one line each.

use scope_core::error::{AppResult, DaqError};
use std::fmt;

/// Line terminator appended to every outgoing command.
pub const TERMINATOR: &str = "\r\n";

/// Two-letter ESP302 command mnemonics used by the stage driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnemonic {
    /// Absolute move, or position query with `?`
    MoveAbsolute,
    /// Relative move
    MoveRelative,
    /// Search for home (origin)
    Home,
    /// Controller status
    Status,
    /// Error code
    Error,
    /// Velocity set, or query with `?`
    Velocity,
}

impl Mnemonic {
    pub fn as_str(self) -> &'static str {
        match self {
            Mnemonic::MoveAbsolute => "PA",
            Mnemonic::MoveRelative => "PR",
            Mnemonic::Home => "OR",
            Mnemonic::Status => "TS",
            Mnemonic::Error => "TE",
            Mnemonic::Velocity => "VA",
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Argument {
    None,
    Query,
    Value(f64),
}

/// One outgoing command, independent of the controller address.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    mnemonic: Mnemonic,
    argument: Argument,
}

impl Command {
    /// Bare command, e.g. `OR`, `TS`, `TE`.
    pub fn plain(mnemonic: Mnemonic) -> Self {
        Self {
            mnemonic,
            argument: Argument::None,
        }
    }

    /// Query form, e.g. `PA?`.
    pub fn query(mnemonic: Mnemonic) -> Self {
        Self {
            mnemonic,
            argument: Argument::Query,
        }
    }

    /// Setter with a numeric argument, e.g. `PA12.5`.
    pub fn set(mnemonic: Mnemonic, value: f64) -> Self {
        Self {
            mnemonic,
            argument: Argument::Value(value),
        }
    }

    pub fn mnemonic(&self) -> Mnemonic {
        self.mnemonic
    }

    /// Command text without the terminator.
    pub fn text(&self, address: u8) -> String {
        match self.argument {
            Argument::None => format!("{}{}", address, self.mnemonic),
            Argument::Query => format!("{}{}?", address, self.mnemonic),
            Argument::Value(v) => format!("{}{}{:.6}", address, self.mnemonic, v),
        }
    }

    /// Full line as written to the port.
    pub fn encode(&self, address: u8) -> String {
        let mut line = self.text(address);
        line.push_str(TERMINATOR);
        line
    }
}

/// Parse the first whitespace-delimited token of a reply as a number.
pub fn parse_number(reply: &str) -> AppResult<f64> {
    let token = reply
        .split_whitespace()
        .next()
        .ok_or_else(|| DaqError::Parse("empty reply".into()))?;
    token
        .parse::<f64>()
        .map_err(|_| DaqError::Parse(format!("'{}' is not a number", token)))
}

/// Busy flag: bit 2 of the first status character.
pub fn parse_busy(reply: &str) -> AppResult<bool> {
    let first = reply
        .bytes()
        .next()
        .ok_or_else(|| DaqError::Parse("empty status reply".into()))?;
    Ok(first & (1 << 2) != 0)
}

/// Controller state decoded from a `TE` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// `@`: no error.
    Clear,
    /// `H`: the axis has not been referenced since power-up.
    NotHomed,
    /// Any other code.
    Fault(char),
}

/// Decode the code character that follows the echoed command in a `TE` reply.
///
/// For address 1 the reply to `1TE` looks like `1TE@`.
pub fn parse_error_status(reply: &str, address: u8) -> AppResult<ErrorStatus> {
    let echo_len = Command::plain(Mnemonic::Error).text(address).len();
    let code = reply
        .get(echo_len..)
        .and_then(|rest| rest.chars().next())
        .ok_or_else(|| {
            DaqError::Parse(format!("error reply '{}' has no code after the echo", reply))
        })?;
    Ok(match code {
        '@' => ErrorStatus::Clear,
        'H' => ErrorStatus::NotHomed,
        other => ErrorStatus::Fault(other),
    })
}
