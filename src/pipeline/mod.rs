use std::any::Any;

pub mod extraction;
pub mod import;
pub mod storage;
pub mod rag;

/// Readable text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_static_and_formatted_payloads() {
        let literal = std::panic::catch_unwind(|| panic!("bad xref")).unwrap_err();
        assert_eq!(panic_message(literal.as_ref()), "bad xref");

        let formatted = std::panic::catch_unwind(|| panic!("page {} broken", 3)).unwrap_err();
        assert_eq!(panic_message(formatted.as_ref()), "page 3 broken");

        let other = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
