use std::fmt;

use serde::{Deserialize, Serialize};

/// A command as an argv vector.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cmd {
  pub argv: Vec<String>,
}

impl Cmd {
  pub fn new(argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
    Self {
      argv: argv.into_iter().map(Into::into).collect(),
    }
  }

  /// Wrap a script in `sh -c`.
  pub fn shell(script: impl Into<String>) -> Self {
    Self::new(["sh".to_string(), "-c".to_string(), script.into()])
  }

  pub fn is_empty(&self) -> bool {
    self.argv.is_empty()
  }

  fn shell_script(&self) -> Option<&str> {
    match self.argv.as_slice() {
      [sh, flag, script] if sh == "sh" && flag == "-c" => Some(script.as_str()),
      _ => None,
    }
  }
}

impl fmt::Display for Cmd {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.shell_script() {
      Some(script) => f.write_str(script),
      None => f.write_str(&self.argv.join(" ")),
    }
  }
}
