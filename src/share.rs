use crate::model::ShareTargets;
use urlencoding::encode;

fn share_message(url: &str, title: &str) -> String {
    format!("{title}: I made something special for you. Open your gift here: {url}")
}

/// Deep-links for WhatsApp, e-mail and SMS carrying the share message and `url`.
pub fn build_targets(url: &str, title: &str) -> ShareTargets {
    let message = share_message(url, title);
    ShareTargets {
        whatsapp: format!("https://wa.me/?text={}", encode(&message)),
        email: format!(
            "mailto:?subject={}&body={}",
            encode(title),
            encode(&message)
        ),
        sms: format!("sms:?&body={}", encode(&message)),
    }
}

/// Text placed on the clipboard when the gift link is copied.
pub fn clipboard_text(url: &str) -> String {
    url.to_string()
}

/// Clipboard capability of the host (browser, desktop shell).
pub trait ClipboardHost {
    fn write_text(&self, text: &str) -> Result<(), String>;
}

/// Copies the gift link. Failures are logged and reported as `false`.
pub fn copy_to_clipboard<H: ClipboardHost + ?Sized>(host: &H, url: &str) -> bool {
    match host.write_text(&clipboard_text(url)) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!("Copying gift link to clipboard failed: {}", err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const URL: &str = "https://g.example/gift/xyz789ghi012";

    #[derive(Default)]
    struct FakeClipboard {
        contents: RefCell<Option<String>>,
        denied: bool,
    }

    impl ClipboardHost for FakeClipboard {
        fn write_text(&self, text: &str) -> Result<(), String> {
            if self.denied {
                return Err("permission denied".into());
            }
            *self.contents.borrow_mut() = Some(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn targets_use_fixed_schemes() {
        let targets = build_targets(URL, "Our Anniversary");
        assert!(targets.whatsapp.starts_with("https://wa.me/?text="));
        assert!(targets.email.starts_with("mailto:?subject=Our%20Anniversary&body="));
        assert!(targets.sms.starts_with("sms:?&body="));
    }

    #[test]
    fn url_is_percent_encoded_into_every_target() {
        let targets = build_targets(URL, "Hi & bye");
        let encoded_url = "https%3A%2F%2Fg.example%2Fgift%2Fxyz789ghi012";
        for link in [&targets.whatsapp, &targets.email, &targets.sms] {
            assert!(link.contains(encoded_url), "{link}");
            assert!(!link.contains(' '));
        }
        assert!(targets.email.contains("subject=Hi%20%26%20bye"));
    }

    #[test]
    fn targets_are_pure() {
        assert_eq!(build_targets(URL, "x"), build_targets(URL, "x"));
    }

    #[test]
    fn clipboard_copy_reports_success() {
        let clipboard = FakeClipboard::default();
        assert!(copy_to_clipboard(&clipboard, URL));
        assert_eq!(clipboard.contents.borrow().as_deref(), Some(URL));
    }

    #[test]
    fn clipboard_failure_is_reported_not_raised() {
        let clipboard = FakeClipboard {
            denied: true,
            ..FakeClipboard::default()
        };
        assert!(!copy_to_clipboard(&clipboard, URL));
        assert!(clipboard.contents.borrow().is_none());
    }
}
