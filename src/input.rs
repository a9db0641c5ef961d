use crate::app::InputMode;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    Down,
    Up,
    PageDown,
    PageUp,
    Top,
    Bottom,
    ToggleExpand,
    TogglePick,
    ExpandLevel,
    ExpandAll,
    CollapseAll,
    ToggleFocus,
    ToggleProjection,
    ToggleHelp,
    StartCommand,
    StartFilter,
    ClearFilter,
    Refresh,
    SubmitInput,
    CancelInput,
    Backspace,
    InputChar(char),
}

pub fn map_key(mode: InputMode, key: KeyEvent) -> Option<Action> {
    match mode {
        InputMode::Normal => map_normal_mode_key(key),
        InputMode::Command | InputMode::Filter => map_input_mode_key(key),
    }
}

fn map_normal_mode_key(key: KeyEvent) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(Action::Quit),
            KeyCode::Char('d') => Some(Action::PageDown),
            KeyCode::Char('u') => Some(Action::PageUp),
            KeyCode::Char('m') | KeyCode::Char('j') => Some(Action::ToggleExpand),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('j') | KeyCode::Down => Some(Action::Down),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::Up),
        KeyCode::PageDown => Some(Action::PageDown),
        KeyCode::PageUp => Some(Action::PageUp),
        KeyCode::Char('g') | KeyCode::Home => Some(Action::Top),
        KeyCode::Char('G') | KeyCode::End => Some(Action::Bottom),
        KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => Some(Action::ToggleExpand),
        KeyCode::Char(' ') => Some(Action::TogglePick),
        KeyCode::Char('e') => Some(Action::ExpandLevel),
        KeyCode::Char('E') => Some(Action::ExpandAll),
        KeyCode::Char('c') => Some(Action::CollapseAll),
        KeyCode::Tab | KeyCode::BackTab => Some(Action::ToggleFocus),
        KeyCode::Char('m') => Some(Action::ToggleProjection),
        KeyCode::Char('?') => Some(Action::ToggleHelp),
        KeyCode::Char(':') => Some(Action::StartCommand),
        KeyCode::Char('/') => Some(Action::StartFilter),
        KeyCode::Char('r') => Some(Action::Refresh),
        KeyCode::Esc => Some(Action::ClearFilter),
        _ => None,
    }
}

fn map_input_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc => Some(Action::CancelInput),
        KeyCode::Enter => Some(Action::SubmitInput),
        KeyCode::Char('m') | KeyCode::Char('j')
            if key.modifiers.contains(KeyModifiers::CONTROL) =>
        {
            Some(Action::SubmitInput)
        }
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Action::CancelInput)
        }
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Char(c) if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT => {
            Some(Action::InputChar(c))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, map_key};
    use crate::app::InputMode;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn normal_mode_maps_picker_keys() {
        assert_eq!(
            map_key(InputMode::Normal, press(KeyCode::Char(' '))),
            Some(Action::TogglePick)
        );
        assert_eq!(
            map_key(InputMode::Normal, press(KeyCode::Enter)),
            Some(Action::ToggleExpand)
        );
        assert_eq!(
            map_key(InputMode::Normal, press(KeyCode::Char('e'))),
            Some(Action::ExpandLevel)
        );
        assert_eq!(
            map_key(
                InputMode::Normal,
                KeyEvent::new(KeyCode::Char('E'), KeyModifiers::SHIFT)
            ),
            Some(Action::ExpandAll)
        );
        assert_eq!(
            map_key(InputMode::Normal, press(KeyCode::Tab)),
            Some(Action::ToggleFocus)
        );
    }

    #[test]
    fn normal_mode_maps_quit() {
        assert_eq!(
            map_key(InputMode::Normal, press(KeyCode::Char('q'))),
            Some(Action::Quit)
        );
        assert_eq!(
            map_key(
                InputMode::Normal,
                KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)
            ),
            Some(Action::Quit)
        );
    }

    #[test]
    fn input_mode_maps_char() {
        let action = map_key(InputMode::Command, press(KeyCode::Char('a')));
        assert_eq!(action, Some(Action::InputChar('a')));
    }

    #[test]
    fn input_mode_treats_picker_keys_as_text() {
        assert_eq!(
            map_key(InputMode::Filter, press(KeyCode::Char(' '))),
            Some(Action::InputChar(' '))
        );
        assert_eq!(
            map_key(InputMode::Filter, press(KeyCode::Char('q'))),
            Some(Action::InputChar('q'))
        );
    }

    #[test]
    fn input_mode_maps_ctrl_m_and_ctrl_j_to_submit() {
        for c in ['m', 'j'] {
            let key = KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL);
            assert_eq!(map_key(InputMode::Command, key), Some(Action::SubmitInput));
        }
    }
}
