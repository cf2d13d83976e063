//! Session lifecycle and view events

use std::fmt;

/// Session lifecycle
///
/// `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Loading = 1,
    Ready = 2,
    Destroyed = 3,
}

impl SessionState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Created,
            1 => SessionState::Loading,
            2 => SessionState::Ready,
            _ => SessionState::Destroyed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Created => "created",
            SessionState::Loading => "loading",
            SessionState::Ready => "ready",
            SessionState::Destroyed => "destroyed",
        })
    }
}

/// Severity of a console message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsoleLevel {
    Log,
    Debug,
    Info,
    Warning,
    Error,
}

/// Frame a loading event refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: u64,
    pub is_main_frame: bool,
    pub url: String,
}

impl FrameInfo {
    pub fn main(url: impl Into<String>) -> Self {
        Self {
            frame_id: 0,
            is_main_frame: true,
            url: url.into(),
        }
    }
}

/// Event posted by the native engine for one view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    BeginLoading(FrameInfo),
    FinishLoading(FrameInfo),
    FailLoading {
        frame: FrameInfo,
        description: String,
        error_domain: String,
        error_code: i32,
    },
    /// The script global object was reset; bindings installed now survive
    /// the page's own scripts
    WindowObjectReady(FrameInfo),
    DomReady(FrameInfo),
    TitleChanged(String),
    UrlChanged(String),
    ConsoleMessage {
        level: ConsoleLevel,
        message: String,
        source_id: String,
        line: u32,
        column: u32,
    },
}

impl ViewEvent {
    /// Whether the event ends a main-frame load.
    pub fn finishes_main_load(&self) -> bool {
        match self {
            ViewEvent::FinishLoading(frame) => frame.is_main_frame,
            ViewEvent::FailLoading { frame, .. } => frame.is_main_frame,
            _ => false,
        }
    }

    pub fn starts_main_load(&self) -> bool {
        matches!(self, ViewEvent::BeginLoading(frame) if frame.is_main_frame)
    }
}
