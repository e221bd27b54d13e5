use chrono::NaiveDate;

use crate::limits::{MAX_EMAIL_LEN, MAX_FULL_NAME_LEN};
use crate::model::{ReservationId, User};

/// Parsed command from one request line.
#[derive(Debug, PartialEq)]
pub enum Command {
    Ping,
    Availability {
        from: Option<NaiveDate>,
        until: Option<NaiveDate>,
    },
    List,
    Get {
        id: ReservationId,
    },
    Reserve {
        start: NaiveDate,
        end: NaiveDate,
        user: Option<User>,
    },
    Update {
        id: ReservationId,
        start: NaiveDate,
        end: NaiveDate,
        user: Option<User>,
    },
    Cancel {
        id: ReservationId,
    },
}

/// Parse `KEYWORD arg...`. Keywords are case-insensitive; dates are ISO
/// `YYYY-MM-DD`; a trailing user is an email followed by the full name,
/// which may contain spaces.
pub fn parse_command(line: &str) -> Result<Command, ProtocolError> {
    let mut words = line.split_whitespace();
    let Some(keyword) = words.next() else {
        return Err(ProtocolError::Empty);
    };
    let args: Vec<&str> = words.collect();

    match keyword.to_ascii_uppercase().as_str() {
        "PING" => {
            expect_arity("PING", &args, 0, 0)?;
            Ok(Command::Ping)
        }
        "LIST" => {
            expect_arity("LIST", &args, 0, 0)?;
            Ok(Command::List)
        }
        "AVAILABILITY" => {
            expect_arity("AVAILABILITY", &args, 0, 2)?;
            Ok(Command::Availability {
                from: args.first().map(|s| parse_date(s)).transpose()?,
                until: args.get(1).map(|s| parse_date(s)).transpose()?,
            })
        }
        "GET" => {
            expect_arity("GET", &args, 1, 1)?;
            Ok(Command::Get {
                id: args[0].to_string(),
            })
        }
        "CANCEL" => {
            expect_arity("CANCEL", &args, 1, 1)?;
            Ok(Command::Cancel {
                id: args[0].to_string(),
            })
        }
        "RESERVE" => {
            if args.len() < 2 {
                return Err(ProtocolError::WrongArity("RESERVE", 2, args.len()));
            }
            Ok(Command::Reserve {
                start: parse_date(args[0])?,
                end: parse_date(args[1])?,
                user: parse_user(&args[2..])?,
            })
        }
        "UPDATE" => {
            if args.len() < 3 {
                return Err(ProtocolError::WrongArity("UPDATE", 3, args.len()));
            }
            Ok(Command::Update {
                id: args[0].to_string(),
                start: parse_date(args[1])?,
                end: parse_date(args[2])?,
                user: parse_user(&args[3..])?,
            })
        }
        _ => Err(ProtocolError::UnknownCommand(keyword.to_string())),
    }
}

fn expect_arity(
    command: &'static str,
    args: &[&str],
    min: usize,
    max: usize,
) -> Result<(), ProtocolError> {
    if args.len() < min {
        return Err(ProtocolError::WrongArity(command, min, args.len()));
    }
    if args.len() > max {
        return Err(ProtocolError::WrongArity(command, max, args.len()));
    }
    Ok(())
}

fn parse_date(s: &str) -> Result<NaiveDate, ProtocolError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ProtocolError::InvalidDate(s.to_string()))
}

/// Absent user words mean "no user"; the engine decides whether that is allowed.
fn parse_user(words: &[&str]) -> Result<Option<User>, ProtocolError> {
    let Some((email, name)) = words.split_first() else {
        return Ok(None);
    };
    if name.is_empty() {
        return Err(ProtocolError::MissingFullName);
    }
    if !email.contains('@') {
        return Err(ProtocolError::InvalidEmail(email.to_string()));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(ProtocolError::FieldTooLong("email", MAX_EMAIL_LEN));
    }
    let full_name = name.join(" ");
    if full_name.len() > MAX_FULL_NAME_LEN {
        return Err(ProtocolError::FieldTooLong("full name", MAX_FULL_NAME_LEN));
    }
    Ok(Some(User::new(*email, full_name)))
}

#[derive(Debug, PartialEq)]
pub enum ProtocolError {
    Empty,
    UnknownCommand(String),
    WrongArity(&'static str, usize, usize),
    InvalidDate(String),
    InvalidEmail(String),
    MissingFullName,
    FieldTooLong(&'static str, usize),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Empty => write!(f, "empty command"),
            ProtocolError::UnknownCommand(c) => write!(f, "unknown command: {c}"),
            ProtocolError::WrongArity(c, expected, got) => {
                write!(f, "{c}: expected {expected} arguments, got {got}")
            }
            ProtocolError::InvalidDate(s) => write!(f, "invalid date (want YYYY-MM-DD): {s}"),
            ProtocolError::InvalidEmail(s) => write!(f, "invalid email: {s}"),
            ProtocolError::MissingFullName => write!(f, "user needs an email and a full name"),
            ProtocolError::FieldTooLong(field, max) => {
                write!(f, "{field} longer than {max} bytes")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}
