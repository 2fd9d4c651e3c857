use serde::{Deserialize, Serialize};

/// Which top-level surface is on screen.
///
/// At most one of the login and player surfaces is visible at any instant.
/// `Transitioning` only exists while one surface is torn down and the other
/// created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowState {
    #[default]
    LoginVisible,
    Transitioning,
    PlayerVisible,
}
