use crate::catalog::BookRecord;
use crate::normalize::normalize_all;
use crate::snapshot::Snapshot;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
}

/// Closed set of commands understood by the socket protocol and the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Fuzzy title search over the words given as arguments.
    Title,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "title" => Ok(Self::Title),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Self::Title => "title",
        }
    }

    pub fn run<'a, S: AsRef<str>>(self, snapshot: &'a Snapshot, args: &[S]) -> Vec<&'a BookRecord> {
        self.run_scored(snapshot, args).into_iter().map(|(_, record)| record).collect()
    }

    /// Matching records with their similarity score, best first.
    pub fn run_scored<'a, S: AsRef<str>>(self, snapshot: &'a Snapshot, args: &[S]) -> Vec<(f32, &'a BookRecord)> {
        match self {
            Self::Title => {
                let query = normalize_all(args);
                snapshot
                    .index()
                    .rank(&query)
                    .into_iter()
                    .filter_map(|entry| snapshot.record(entry.id).map(|record| (entry.score, record)))
                    .collect()
            }
        }
    }
}

/// Resolve `name` and run it against `snapshot`, cloning the matched records.
pub fn execute<S: AsRef<str>>(snapshot: &Snapshot, name: &str, args: &[S]) -> Result<Vec<BookRecord>, CommandError> {
    let command: Command = name.parse()?;
    Ok(command.run(snapshot, args).into_iter().cloned().collect())
}
