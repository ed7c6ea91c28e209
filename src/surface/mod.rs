//! Abstract interaction surface for web reputation lookups
//!
//! The orchestrator never talks to a browser directly; it drives whatever
//! implements [`InteractionSurface`]. The production implementation speaks
//! the WebDriver protocol ([`webdriver::WebDriverSurface`]); tests use
//! scripted fakes.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod webdriver;

/// Element lookup strategies understood by the surface
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LocateBy {
    Name,
    Css,
    Xpath,
}

/// How to find one element on the rendered page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Locator {
    pub by: LocateBy,
    pub value: String,
}

impl Locator {
    pub fn name(value: impl Into<String>) -> Self {
        Self {
            by: LocateBy::Name,
            value: value.into(),
        }
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self {
            by: LocateBy::Css,
            value: value.into(),
        }
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self {
            by: LocateBy::Xpath,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let by = match self.by {
            LocateBy::Name => "name",
            LocateBy::Css => "css",
            LocateBy::Xpath => "xpath",
        };
        write!(f, "{}={}", by, self.value)
    }
}

/// Opaque handle to a located element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle(pub String);

/// Cell text of one rendered table: rows of data cells
pub type TableGrid = Vec<Vec<String>>;

#[derive(thiserror::Error, Debug)]
pub enum SurfaceError {
    #[error("element not found: {0}")]
    NotFound(String),
    /// An unexpected modal interruption (alert, dialog) is in the way
    #[error("unexpected interruption: {0}")]
    Interruption(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("surface protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SurfaceError {
    pub fn is_interruption(&self) -> bool {
        matches!(self, SurfaceError::Interruption(_))
    }
}

/// One rendered remote page plus the actions available against it.
///
/// A single surface instance is shared across all indicators and sources;
/// only one caller drives it at a time.
#[async_trait]
pub trait InteractionSurface: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), SurfaceError>;

    async fn locate(&mut self, locator: &Locator) -> Result<ElementHandle, SurfaceError>;

    async fn clear(&mut self, element: &ElementHandle) -> Result<(), SurfaceError>;

    async fn type_text(&mut self, element: &ElementHandle, text: &str)
        -> Result<(), SurfaceError>;

    async fn click(&mut self, element: &ElementHandle) -> Result<(), SurfaceError>;

    /// Pick an option from a multi-choice control by its visible text
    async fn select_option(
        &mut self,
        element: &ElementHandle,
        option: &str,
    ) -> Result<(), SurfaceError>;

    async fn read_text(&mut self, element: &ElementHandle) -> Result<String, SurfaceError>;

    /// Text of every element the locator matches, in document order
    async fn read_text_all(&mut self, locator: &Locator) -> Result<Vec<String>, SurfaceError>;

    /// Cell text of every table on the page, in document order
    async fn read_tables(&mut self) -> Result<Vec<TableGrid>, SurfaceError>;

    async fn current_markup(&mut self) -> Result<String, SurfaceError>;

    /// Dismiss a pending modal interruption, returning its text if one was
    /// present
    async fn dismiss_interruption(&mut self) -> Result<Option<String>, SurfaceError>;

    async fn capture_snapshot(&mut self, path: &Path) -> Result<(), SurfaceError>;
}
