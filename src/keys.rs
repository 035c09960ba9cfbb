//! Keyboard shortcuts for review sessions.
//!
//! `Space` reveals, `1`..`5` grade (again, fail, hard, good, easy) and
//! `Enter`/`→` advance. Keys typed into form fields or pressed with a
//! modifier are ignored.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};

use crate::{
    runtime::{RuntimeError, session::ReviewSessionHandle},
    types::Outcome,
};

/// Physical key, reduced to what the binder cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Space bar.
    Space,
    /// Top-row digit `0..=9`.
    Digit(u8),
    /// Enter / Return.
    Enter,
    /// Right arrow.
    ArrowRight,
    /// Anything else.
    Other,
}

impl Key {
    fn is_advance(self) -> bool {
        matches!(self, Key::Enter | Key::ArrowRight)
    }
}

/// Held modifier keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Control.
    pub ctrl: bool,
    /// Meta / Super / Command.
    pub meta: bool,
    /// Alt / Option.
    pub alt: bool,
    /// Shift.
    pub shift: bool,
}

impl Modifiers {
    /// True when any modifier is held.
    pub fn any(self) -> bool {
        self.ctrl || self.meta || self.alt || self.shift
    }
}

/// Where keyboard focus was when the key was pressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FocusTarget {
    /// Page body or the review card.
    #[default]
    Document,
    /// Single-line text input.
    Input,
    /// Multi-line text area.
    TextArea,
    /// Drop-down select.
    Select,
}

impl FocusTarget {
    fn is_form_field(self) -> bool {
        !matches!(self, FocusTarget::Document)
    }
}

/// One key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    /// Pressed key.
    pub key: Key,
    /// Held modifiers.
    pub modifiers: Modifiers,
    /// Focus at press time.
    pub focus: FocusTarget,
}

impl KeyInput {
    /// Unmodified press with document focus.
    pub fn plain(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers::default(),
            focus: FocusTarget::Document,
        }
    }
}

impl From<KeyEvent> for KeyInput {
    fn from(event: KeyEvent) -> Self {
        let key = match event.code {
            KeyCode::Char(' ') => Key::Space,
            KeyCode::Char(c) if c.is_ascii_digit() => Key::Digit(c as u8 - b'0'),
            KeyCode::Enter => Key::Enter,
            KeyCode::Right => Key::ArrowRight,
            _ => Key::Other,
        };
        let m = event.modifiers;
        Self {
            key,
            modifiers: Modifiers {
                ctrl: m.contains(KeyModifiers::CONTROL),
                meta: m.contains(KeyModifiers::SUPER) || m.contains(KeyModifiers::META),
                alt: m.contains(KeyModifiers::ALT),
                shift: m.contains(KeyModifiers::SHIFT),
            },
            focus: FocusTarget::Document,
        }
    }
}

/// Session command bound to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutCommand {
    /// Reveal the answer.
    Reveal,
    /// Grade the current card.
    Grade(Outcome),
    /// Advance to the next card.
    Next,
}

/// Result of mapping one key press.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyDispatch {
    /// Command to run, if any.
    pub command: Option<ShortcutCommand>,
    /// Whether the host should suppress the key's default action.
    pub prevent_default: bool,
}

/// Maps a key press to a session command.
///
/// Advance keys always suppress the default action while the binder is
/// active, even when `can_go_next` is false and no command is produced.
pub fn map_key(input: &KeyInput, can_go_next: bool) -> KeyDispatch {
    if input.focus.is_form_field() || input.modifiers.any() {
        return KeyDispatch::default();
    }

    match input.key {
        Key::Space => KeyDispatch {
            command: Some(ShortcutCommand::Reveal),
            prevent_default: true,
        },
        Key::Digit(d @ 1..=5) => KeyDispatch {
            command: Some(ShortcutCommand::Grade(Outcome::ALL[usize::from(d - 1)])),
            prevent_default: true,
        },
        Key::Enter | Key::ArrowRight => KeyDispatch {
            command: can_go_next.then_some(ShortcutCommand::Next),
            prevent_default: true,
        },
        _ => KeyDispatch::default(),
    }
}

/// Maps `input` and runs the resulting command against `session`.
pub async fn dispatch_key(
    session: &ReviewSessionHandle,
    input: &KeyInput,
) -> Result<KeyDispatch, RuntimeError> {
    let can_go_next = if input.key.is_advance() {
        session.snapshot().await?.can_go_next
    } else {
        false
    };

    let dispatch = map_key(input, can_go_next);
    match dispatch.command {
        Some(ShortcutCommand::Reveal) => {
            session.reveal_answer().await?;
        }
        Some(ShortcutCommand::Grade(outcome)) => {
            session.record_outcome(outcome).await?;
        }
        Some(ShortcutCommand::Next) => {
            session.go_next().await?;
        }
        None => {}
    }
    Ok(dispatch)
}

/// Global key listener bound to one review session.
///
/// While enabled, a single task subscribes to `source` and dispatches every
/// key press. Disabling or dropping the binder removes the listener.
pub struct ShortcutBinder {
    source: broadcast::Sender<KeyInput>,
    session: ReviewSessionHandle,
    listener: Option<JoinHandle<()>>,
}

impl ShortcutBinder {
    /// Creates a disabled binder.
    pub fn new(source: broadcast::Sender<KeyInput>, session: ReviewSessionHandle) -> Self {
        Self {
            source,
            session,
            listener: None,
        }
    }

    /// Creates a binder and enables it immediately.
    pub fn bind(source: broadcast::Sender<KeyInput>, session: ReviewSessionHandle) -> Self {
        let mut binder = Self::new(source, session);
        binder.set_enabled(true);
        binder
    }

    /// True while a listener is installed.
    pub fn is_enabled(&self) -> bool {
        self.listener.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Installs or removes the listener. Enabling twice keeps one listener.
    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.unbind();
            return;
        }
        if self.is_enabled() {
            return;
        }

        let mut rx = self.source.subscribe();
        let session = self.session.clone();
        self.listener = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(input) => match dispatch_key(&session, &input).await {
                        Ok(dispatch) => {
                            tracing::trace!(?input, ?dispatch, "shortcut dispatched");
                        }
                        Err(RuntimeError::ChannelClosed) => break,
                        Err(err) => {
                            tracing::warn!(error = %err, "shortcut dispatch failed");
                        }
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "shortcut listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    fn unbind(&mut self) {
        if let Some(task) = self.listener.take() {
            task.abort();
        }
    }
}

impl Drop for ShortcutBinder {
    fn drop(&mut self) {
        self.unbind();
    }
}
