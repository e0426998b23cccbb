/// Message routing: decides whether an inbound message belongs to the open view
use crate::model::{ChatKind, Message, GROUP_CHAT_ID};
use crate::session::SessionState;

/// True when `message` should appear in the channel `viewer` has open.
///
/// Notes are checked before the generic from-me / to-me branches: a notes
/// message is both, and must only show up in the notes channel.
pub fn is_visible(message: &Message, viewer: &SessionState) -> bool {
    let current = viewer.current_channel_id;
    let viewer_id = viewer.viewer_id();

    let from_me = viewer_id == Some(message.author.id);
    let to_me = viewer_id == Some(message.chat_id);
    let is_notes = from_me && to_me;

    match message.kind() {
        ChatKind::Group => current == GROUP_CHAT_ID,
        ChatKind::Private if is_notes => Some(current) == viewer_id,
        ChatKind::Private if from_me => current == message.chat_id,
        ChatKind::Private if to_me => current == message.author.id,
        // Neither sent nor received by the viewer
        ChatKind::Private => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PublicIdentity, User};

    fn viewer(current: i64) -> SessionState {
        let mut s = SessionState::new();
        s.login(User::new(7, "ann"));
        s.switch_channel(current);
        s
    }

    fn msg(author: i64, chat: i64) -> Message {
        Message::new(PublicIdentity::new(author, format!("u{}", author)), chat, "text")
    }

    #[test]
    fn test_viewer_in_group_channel() {
        let s = viewer(0);
        assert!(is_visible(&msg(3, 0), &s));
        assert!(!is_visible(&msg(3, 9), &s));
    }

    #[test]
    fn test_viewer_in_notes_channel() {
        let s = viewer(7);
        assert!(is_visible(&msg(7, 7), &s));
        assert!(!is_visible(&msg(7, 9), &s));
        assert!(!is_visible(&msg(3, 0), &s));
    }

    #[test]
    fn test_viewer_in_private_channel() {
        let s = viewer(9);
        assert!(is_visible(&msg(9, 7), &s));
        assert!(is_visible(&msg(7, 9), &s));
        assert!(!is_visible(&msg(9, 3), &s));
        // Notes never leak into a private channel
        assert!(!is_visible(&msg(7, 7), &s));
    }

    #[test]
    fn test_group_visibility_ignores_author() {
        for current in [0, 7, 9] {
            let s = viewer(current);
            for author in [3, 7, 9] {
                assert_eq!(is_visible(&msg(author, 0), &s), current == 0);
            }
        }
    }

    #[test]
    fn test_notes_visible_only_in_notes() {
        for current in [0, 3, 7, 9] {
            let s = viewer(current);
            assert_eq!(is_visible(&msg(7, 7), &s), current == 7);
        }
    }

    #[test]
    fn test_private_hidden_when_logged_out() {
        let s = SessionState::new();
        assert!(is_visible(&msg(3, 0), &s));
        assert!(!is_visible(&msg(3, 9), &s));
    }

    #[test]
    fn test_is_visible_is_repeatable() {
        let s = viewer(9);
        let m = msg(9, 7);
        assert_eq!(is_visible(&m, &s), is_visible(&m, &s));
    }
}
