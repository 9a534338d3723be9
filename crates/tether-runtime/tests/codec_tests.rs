//! String codec round trips and edge cases

mod common;

use common::*;
#[allow(unused_imports)]
use common::{assert_eq, assert_ne};
use proptest::prelude::*;
use rstest::rstest;
use tether_runtime::codec::{self, bstr_byte_len, max_encoded_len};
use tether_runtime::{Encoding, Handle, InteropError};

#[rstest]
#[case(Encoding::Narrow, "plain ascii")]
#[case(Encoding::Utf8, "grüße, 世界")]
#[case(Encoding::Wide, "surrogates 😀🎉")]
#[case(Encoding::BStr, "with\0embedded\0nuls")]
#[case(Encoding::BStr, "")]
fn test_roundtrip_examples(#[case] encoding: Encoding, #[case] text: &str) {
    let interop = interop();
    let h = interop.encode(text, encoding).unwrap();
    assert_eq!(unsafe { interop.decode(h, encoding) }.as_deref(), Some(text));
    assert!(interop.free(h));
}

#[rstest]
#[case(Encoding::Narrow)]
#[case(Encoding::Utf8)]
#[case(Encoding::Wide)]
#[case(Encoding::BStr)]
fn test_null_is_absent_not_empty(#[case] encoding: Encoding) {
    let interop = interop();
    assert_eq!(unsafe { interop.decode(Handle::NULL, encoding) }, None);

    let empty = interop.encode("", encoding).unwrap();
    assert_eq!(unsafe { interop.decode(empty, encoding) }, Some(String::new()));
    interop.free(empty);
}

#[test]
fn test_invalid_selector_both_directions() {
    let interop = interop();
    assert!(matches!(
        interop.encode_raw("x", 7),
        Err(InteropError::InvalidEncoding(7))
    ));
    assert!(matches!(
        unsafe { interop.decode_raw(Handle::NULL, 7) },
        Err(InteropError::InvalidEncoding(7))
    ));
    assert_eq!(interop.live_blocks(), 0);
}

#[test]
fn test_raw_selectors_match_encodings() {
    let interop = interop();
    let h = interop.encode_raw("sel", 2).unwrap();
    assert_eq!(unsafe { interop.decode_raw(h, 2) }.unwrap().as_deref(), Some("sel"));
    interop.free(h);
}

#[test]
fn test_narrow_block_is_max_encoded_len_plus_one() {
    let interop = interop();
    let text = "aé😀";
    let h = interop.encode(text, Encoding::Narrow).unwrap();
    assert_eq!(max_encoded_len(text), Some(12));
    assert_eq!(interop.block_len(h), Some(13));

    let bytes = interop.read_block(h).unwrap();
    assert_eq!(&bytes[..text.len()], text.as_bytes());
    assert_eq!(bytes[text.len()], 0);
    interop.free(h);
}

#[test]
fn test_bstr_layout() {
    let interop = interop();
    let h = interop.encode("hi", Encoding::BStr).unwrap();
    assert_eq!(unsafe { bstr_byte_len(h) }, Some(4));
    // Payload plus terminator; the header sits before the handle.
    assert_eq!(interop.read_block(h).unwrap(), vec![b'h', 0, b'i', 0, 0, 0]);
    interop.free(h);
}

#[test]
fn test_decode_stops_at_first_terminator() {
    let narrow = b"left\0right\0";
    let wide: Vec<u16> = "ab\0cd\0".encode_utf16().collect();
    unsafe {
        assert_eq!(
            codec::decode(Handle::from_ptr(narrow.as_ptr()), Encoding::Utf8).as_deref(),
            Some("left")
        );
        assert_eq!(
            codec::decode(Handle::from_ptr(wide.as_ptr()), Encoding::Wide).as_deref(),
            Some("ab")
        );
    }
}

#[test]
fn test_invalid_sequences_decode_lossily() {
    let bytes = [0x66u8, 0xFF, 0x6F, 0];
    let text = unsafe { codec::decode(Handle::from_ptr(bytes.as_ptr()), Encoding::Narrow) };
    assert_eq!(text.as_deref(), Some("f\u{FFFD}o"));
}

proptest! {
    #[test]
    fn prop_terminated_roundtrip(text in "\\PC{0,48}") {
        let interop = interop();
        for encoding in [Encoding::Narrow, Encoding::Utf8, Encoding::Wide] {
            let h = interop.encode(&text, encoding).unwrap();
            prop_assert_eq!(unsafe { interop.decode(h, encoding) }, Some(text.clone()));
            prop_assert!(interop.free(h));
        }
        prop_assert_eq!(interop.live_blocks(), 0);
    }

    #[test]
    fn prop_bstr_roundtrip_with_nuls(text in any::<String>()) {
        let interop = interop();
        let h = interop.encode(&text, Encoding::BStr).unwrap();
        prop_assert_eq!(unsafe { interop.decode(h, Encoding::BStr) }, Some(text.clone()));
        prop_assert!(interop.free(h));
        prop_assert!(!interop.free(h));
    }
}
