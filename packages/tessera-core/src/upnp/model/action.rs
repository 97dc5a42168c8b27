//! Actions and their arguments.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

/// Direction of an action argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Parses the `<direction>` element text (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        if s.trim().eq_ignore_ascii_case("in") {
            Some(Self::In)
        } else if s.trim().eq_ignore_ascii_case("out") {
            Some(Self::Out)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Argument {
    pub name: String,
    pub direction: Direction,
    #[serde(rename = "relatedStateVariable")]
    pub related_state_variable: String,
}

impl Argument {
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        related_state_variable: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            related_state_variable: related_state_variable.into(),
        }
    }

    pub fn input(name: impl Into<String>, related: impl Into<String>) -> Self {
        Self::new(name, Direction::In, related)
    }

    pub fn output(name: impl Into<String>, related: impl Into<String>) -> Self {
        Self::new(name, Direction::Out, related)
    }
}

/// Mismatch between supplied and declared in-arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentMismatch {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
    pub duplicated: Vec<String>,
}

impl fmt::Display for ArgumentMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing [{}]", self.missing.join(", ")));
        }
        if !self.unexpected.is_empty() {
            parts.push(format!("unexpected [{}]", self.unexpected.join(", ")));
        }
        if !self.duplicated.is_empty() {
            parts.push(format!("duplicated [{}]", self.duplicated.join(", ")));
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// A named operation of a service with its ordered argument list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub name: String,
    pub arguments: Vec<Argument>,
}

impl Action {
    pub fn new(name: impl Into<String>, arguments: Vec<Argument>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn in_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments
            .iter()
            .filter(|a| a.direction == Direction::In)
    }

    pub fn out_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments
            .iter()
            .filter(|a| a.direction == Direction::Out)
    }

    pub fn argument(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().find(|a| a.name == name)
    }

    /// Checks that `supplied` names exactly the declared in-arguments,
    /// each once.
    pub fn check_in_arguments<'a, I>(&self, supplied: I) -> Result<(), ArgumentMismatch>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let declared: HashSet<&str> = self.in_arguments().map(|a| a.name.as_str()).collect();
        let mut seen = HashSet::new();
        let mut mismatch = ArgumentMismatch::default();

        for name in supplied {
            if !seen.insert(name) {
                mismatch.duplicated.push(name.to_string());
            } else if !declared.contains(name) {
                mismatch.unexpected.push(name.to_string());
            }
        }
        mismatch.missing = self
            .in_arguments()
            .filter(|a| !seen.contains(a.name.as_str()))
            .map(|a| a.name.clone())
            .collect();

        if mismatch == ArgumentMismatch::default() {
            Ok(())
        } else {
            Err(mismatch)
        }
    }
}
