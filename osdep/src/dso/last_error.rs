use std::cell::RefCell;

thread_local! {
    // One slot per thread, so failing calls on other threads never overwrite it.
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Returns the description of the most recent loader failure on the calling thread, or `None` if there has not been one.
///
/// Every failing [`Handle::open`](super::Handle::open), [`Handle::open_self`](super::Handle::open_self) or
/// [`Handle::close`](super::Handle::close) overwrites it. Successful calls and missing symbols leave it unchanged.
#[must_use]
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Like [`last_error`], but also clears the slot
#[must_use]
pub fn take_last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow_mut().take())
}

pub(super) fn record(message: &str) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message.to_owned()));
}

#[cfg(test)]
mod test {
    use super::{last_error, record, take_last_error};

    #[test]
    fn test_record_overwrites() {
        record("first");
        record("second");
        assert_eq!(last_error().as_deref(), Some("second"));
        assert_eq!(take_last_error().as_deref(), Some("second"));
        assert_eq!(last_error(), None);
    }

    #[test]
    fn test_per_thread() {
        record("only on this thread");
        let other = std::thread::spawn(last_error).join().unwrap();
        assert_eq!(other, None);
        assert_eq!(last_error().as_deref(), Some("only on this thread"));
    }
}
