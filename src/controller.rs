use std::time::Duration;
use tracing::trace;

use crate::domain::{Message, WFVConfig, WFVError};
use crate::model::Model;
use ratatui::crossterm::event::{self, Event, KeyCode, KeyModifiers};

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(cfg: &WFVConfig) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
        }
    }

    pub fn handle_event(&self, model: &Model) -> Result<Option<Message>, WFVError> {
        if event::poll(Duration::from_millis(self.event_poll_time))? {
            return Ok(match event::read()? {
                Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                    self.route_key(key, model.raw_keyevents())
                }
                Event::Resize(width, height) => {
                    Some(Message::Resize(width as usize, height as usize))
                }
                _ => None,
            });
        }
        Ok(None)
    }

    /// Ctrl-C always quits, other keys go to the command line while it is active.
    pub fn route_key(&self, key: event::KeyEvent, raw: bool) -> Option<Message> {
        match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Message::Quit),
            _ if raw => Some(Message::RawKey(key)),
            _ => self.handle_key(key),
        }
    }

    pub fn handle_key(&self, key: event::KeyEvent) -> Option<Message> {
        let message = match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Message::Quit),
            (KeyCode::Char('q'), _) => Some(Message::Quit),
            (KeyCode::Char('j') | KeyCode::Down, _) => Some(Message::MoveDown),
            (KeyCode::Char('k') | KeyCode::Up, _) => Some(Message::MoveUp),
            (KeyCode::Char('l') | KeyCode::Char('n') | KeyCode::Right | KeyCode::PageDown, _) => {
                Some(Message::NextPage)
            }
            (KeyCode::Char('h') | KeyCode::Char('p') | KeyCode::Left | KeyCode::PageUp, _) => {
                Some(Message::PrevPage)
            }
            (KeyCode::Char('g') | KeyCode::Home, _) => Some(Message::FirstPage),
            (KeyCode::Char('G') | KeyCode::End, _) => Some(Message::LastPage),
            (KeyCode::Char('r'), _) => Some(Message::CycleRowsPerPage),
            (KeyCode::Char('f'), _) => Some(Message::NextRepository),
            (KeyCode::Char('F'), _) => Some(Message::PrevRepository),
            (KeyCode::Char('x'), _) => Some(Message::ClearFilter),
            (KeyCode::Char('/'), _) => Some(Message::Filter),
            (KeyCode::Char('c'), _) => Some(Message::ToggleCharts),
            (KeyCode::Char('y'), _) => Some(Message::CopyRow),
            (KeyCode::Char('?'), _) => Some(Message::Help),
            (KeyCode::Enter, _) => Some(Message::Enter),
            (KeyCode::Esc, _) => Some(Message::Exit),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}
