//! Native status words and their translation.
//!
//! The vendor library reports every operation outcome as a 16-bit status
//! word. [`NativeStatus`] wraps the raw word; [`StatusKind`] is the closed
//! classification the rest of the bridge works with. Translation is pure and
//! total: any word outside the documented set maps to [`StatusKind::Unknown`]
//! with a message carrying the raw value for diagnosis.

use std::fmt;

// ---------------------------------------------------------------------------
// Status word
// ---------------------------------------------------------------------------

/// Raw 16-bit status word returned by the vendor card library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeStatus(pub u16);

impl NativeStatus {
    pub const OK: NativeStatus = NativeStatus(0x0000);
    pub const CONTEXT_ERROR: NativeStatus = NativeStatus(0x0001);
    pub const NOT_INITIALIZED: NativeStatus = NativeStatus(0x0002);
    pub const ALREADY_INITIALIZED: NativeStatus = NativeStatus(0x0003);
    pub const NO_CARD: NativeStatus = NativeStatus(0x0004);
    pub const UNKNOWN_CARD: NativeStatus = NativeStatus(0x0005);
    pub const WRONG_LENGTH: NativeStatus = NativeStatus(0x6282);
    pub const WRONG_TYPE: NativeStatus = NativeStatus(0x6981);
    pub const NOT_AUTHORIZED: NativeStatus = NativeStatus(0x6982);
    pub const PIN_BLOCKED: NativeStatus = NativeStatus(0x6983);
    pub const WRONG_DATA: NativeStatus = NativeStatus(0x6A80);
    pub const FILE_NOT_FOUND: NativeStatus = NativeStatus(0x6A82);
    pub const RECORD_NOT_FOUND: NativeStatus = NativeStatus(0x6A83);
    pub const WRONG_LEN: NativeStatus = NativeStatus(0x6A85);
    pub const UNKNOWN_OBJECT: NativeStatus = NativeStatus(0x6A88);
    pub const ALREADY_EXISTS: NativeStatus = NativeStatus(0x6A89);
    pub const GENERIC_ERROR: NativeStatus = NativeStatus(0xFFFF);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// Classify the word into the closed status taxonomy.
    pub fn kind(self) -> StatusKind {
        match self.0 {
            0x0000 => StatusKind::Ok,
            0x0001 => StatusKind::ContextError,
            0x0002 => StatusKind::NotInitialized,
            0x0003 => StatusKind::AlreadyInitialized,
            0x0004 => StatusKind::NoCard,
            0x0005 => StatusKind::UnknownCard,
            0x6282 => StatusKind::WrongLength,
            0x6981 => StatusKind::WrongType,
            0x6982 => StatusKind::NotAuthorized,
            0x6983 => StatusKind::PinBlocked,
            0x6A80 => StatusKind::WrongData,
            0x6A82 => StatusKind::FileNotFound,
            0x6A83 => StatusKind::RecordNotFound,
            0x6A85 => StatusKind::WrongLen,
            0x6A88 => StatusKind::UnknownObject,
            0x6A89 => StatusKind::AlreadyExists,
            0xFFFF => StatusKind::GenericError,
            _ => StatusKind::Unknown,
        }
    }

    /// Human-readable message for the word.
    pub fn message(self) -> String {
        match self.kind() {
            StatusKind::Ok => "OK".into(),
            StatusKind::ContextError => "smart card context error".into(),
            StatusKind::NotInitialized => "card library not initialized".into(),
            StatusKind::AlreadyInitialized => "card library already initialized".into(),
            StatusKind::NoCard => "no card present".into(),
            StatusKind::UnknownCard => "card not recognized".into(),
            StatusKind::WrongLength => "wrong data length".into(),
            StatusKind::WrongType => "wrong file type".into(),
            StatusKind::NotAuthorized => "not authorized (wrong PIN?)".into(),
            StatusKind::PinBlocked => "PIN blocked".into(),
            StatusKind::WrongData => "wrong data".into(),
            StatusKind::FileNotFound => "file not found".into(),
            StatusKind::RecordNotFound => "record not found".into(),
            StatusKind::WrongLen => "wrong length".into(),
            StatusKind::UnknownObject => "unknown object".into(),
            StatusKind::AlreadyExists => "already exists".into(),
            StatusKind::GenericError => "generic card error".into(),
            StatusKind::Unknown => format!("unknown status 0x{:04X}", self.0),
        }
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X} ({})", self.0, self.message())
    }
}

// ---------------------------------------------------------------------------
// Status taxonomy
// ---------------------------------------------------------------------------

/// Closed classification of vendor status words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Ok,
    ContextError,
    NotInitialized,
    AlreadyInitialized,
    NoCard,
    UnknownCard,
    WrongLength,
    WrongType,
    NotAuthorized,
    PinBlocked,
    WrongData,
    FileNotFound,
    RecordNotFound,
    WrongLen,
    UnknownObject,
    AlreadyExists,
    GenericError,
    /// Any word outside the documented set.
    Unknown,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_words_classify() {
        assert_eq!(NativeStatus::OK.kind(), StatusKind::Ok);
        assert_eq!(NativeStatus(0x0004).kind(), StatusKind::NoCard);
        assert_eq!(NativeStatus(0x6982).kind(), StatusKind::NotAuthorized);
        assert_eq!(NativeStatus(0x6983).kind(), StatusKind::PinBlocked);
        assert_eq!(NativeStatus(0xFFFF).kind(), StatusKind::GenericError);
    }

    #[test]
    fn test_unknown_word_carries_raw_value() {
        let status = NativeStatus(0x1234);
        assert_eq!(status.kind(), StatusKind::Unknown);
        assert!(status.message().contains("0x1234"));
    }

    #[test]
    fn test_translation_is_total() {
        // Spot-check a spread of arbitrary words: every input yields a
        // non-empty message without panicking.
        for raw in [0x0000u16, 0x0006, 0x1000, 0x6281, 0x6A84, 0x9000, 0xFFFE] {
            assert!(!NativeStatus(raw).message().is_empty());
        }
    }

    #[test]
    fn test_is_ok() {
        assert!(NativeStatus::OK.is_ok());
        assert!(!NativeStatus::GENERIC_ERROR.is_ok());
    }

    #[test]
    fn test_display_includes_word_and_message() {
        let text = NativeStatus::NO_CARD.to_string();
        assert!(text.contains("0x0004"));
        assert!(text.contains("no card present"));
    }
}
