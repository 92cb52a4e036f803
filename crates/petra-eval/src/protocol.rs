//! Line-oriented control protocol of a running simulation.
//!
//! A client sends one command per line:
//!
//! ```text
//! REPORTS
//! FIRE <transition-id> <instance-id>
//! DETACH
//! QUIT
//! ```
//!
//! `REPORTS` answers with the report XML on one line, `FIRE` with `Ok` or a
//! rejection. `DETACH` ends the session and leaves the simulation running;
//! `QUIT` ends both.

use std::fmt;
use std::io::{self, BufRead, Write};

use tracing::debug;

use crate::error::EvalError;
use crate::simulation::{FireOutcome, Simulation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reports,
    Fire { transition: u32, instance: u32 },
    Detach,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err("empty command".into());
        };
        let command = match name {
            "REPORTS" => Self::Reports,
            "DETACH" => Self::Detach,
            "QUIT" => Self::Quit,
            "FIRE" => {
                let mut number = |what: &str| -> Result<u32, String> {
                    let word = words.next().ok_or_else(|| format!("FIRE needs a {what} id"))?;
                    word.parse()
                        .map_err(|_| format!("invalid {what} id '{word}'"))
                };
                let transition = number("transition")?;
                let instance = number("instance")?;
                Self::Fire {
                    transition,
                    instance,
                }
            }
            other => return Err(format!("unknown command '{other}'")),
        };
        match words.next() {
            Some(extra) => Err(format!("unexpected argument '{extra}'")),
            None => Ok(command),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Report(String),
    Ok,
    Rejected(String),
    Detached,
    Quit,
}

impl Response {
    /// Whether the session ends after this response.
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::Detached | Self::Quit)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Report(xml) => write!(f, "{xml}"),
            Self::Ok => write!(f, "Ok"),
            Self::Rejected(reason) => write!(f, "Rejected: {reason}"),
            Self::Detached => write!(f, "Detached"),
            Self::Quit => write!(f, "Quit"),
        }
    }
}

impl Simulation {
    /// Run one client command. A model fault while firing is an error; a
    /// command that cannot be carried out is a rejection.
    pub fn execute(&mut self, command: Command) -> Result<Response, EvalError> {
        match command {
            Command::Reports => Ok(Response::Report(self.report()?)),
            Command::Detach => Ok(Response::Detached),
            Command::Quit => Ok(Response::Quit),
            Command::Fire {
                transition,
                instance,
            } => {
                if self.instance(instance).is_err() {
                    return Ok(Response::Rejected(format!("no net instance {instance}")));
                }
                for process in 0..self.process_count() {
                    match self.fire(instance, process, transition) {
                        Ok(FireOutcome::NotEnabled) => continue,
                        Ok(_) => {
                            self.flush()?;
                            return Ok(Response::Ok);
                        }
                        Err(EvalError::Lookup(err)) => return Ok(Response::Rejected(err.to_string())),
                        Err(err) => return Err(err),
                    }
                }
                Ok(Response::Rejected(format!("transition {transition} is not enabled")))
            }
        }
    }
}

/// Serve commands from `input` until the client detaches, quits or hangs
/// up. Returns the final response, if any.
pub fn serve<R: BufRead, W: Write>(
    sim: &mut Simulation,
    input: R,
    mut output: W,
) -> io::Result<Option<Response>> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match Command::parse(&line) {
            Ok(command) => {
                debug!(?command, "client command");
                sim.execute(command)
                    .map_err(io::Error::other)?
            }
            Err(reason) => Response::Rejected(reason),
        };
        writeln!(output, "{response}")?;
        output.flush()?;
        if response.ends_session() {
            return Ok(Some(response));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("REPORTS"), Ok(Command::Reports));
        assert_eq!(Command::parse("  QUIT "), Ok(Command::Quit));
        assert_eq!(Command::parse("DETACH"), Ok(Command::Detach));
        assert_eq!(
            Command::parse("FIRE 10 0"),
            Ok(Command::Fire {
                transition: 10,
                instance: 0
            })
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("FIRE 10").is_err());
        assert!(Command::parse("FIRE x 0").is_err());
        assert!(Command::parse("FIRE 1 2 3").is_err());
        assert!(Command::parse("reports").is_err());
        assert!(Command::parse("QUIT now").is_err());
    }

    #[test]
    fn test_response_display() {
        assert_eq!(Response::Ok.to_string(), "Ok");
        assert_eq!(
            Response::Rejected("no".into()).to_string(),
            "Rejected: no"
        );
        assert!(Response::Quit.ends_session());
        assert!(!Response::Ok.ends_session());
    }
}
