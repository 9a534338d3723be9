//! String array marshaling and cascading release

mod common;

use common::*;
#[allow(unused_imports)]
use common::{assert_eq, assert_ne};
use std::mem::size_of;
use tether_runtime::{Encoding, Handle, InteropError};

#[test]
fn test_cascading_free_releases_every_element() {
    let interop = interop();
    let table = interop.encode_array(&["a", "bb", "ccc"], Encoding::Utf8).unwrap();
    assert_eq!(interop.array_len(table), Some(3));
    assert_eq!(interop.live_arrays(), 1);

    let elements = unsafe { interop.decode_array_with(table, 3, |h| h) }.unwrap();
    assert_eq!(elements.len(), 3);
    for h in &elements {
        assert!(interop.is_allocated(*h));
    }

    assert!(interop.free(table));

    assert!(!interop.is_allocated(table));
    assert!(!interop.is_string_array(table));
    for h in &elements {
        assert!(!interop.is_allocated(*h), "element {} survived the array", h);
        assert!(!interop.free(*h));
    }
    assert_drained(&interop);
}

#[test]
fn test_decode_array_uses_caller_count() {
    let interop = interop();
    let table = interop.encode_array(&["one", "two", "three"], Encoding::Wide).unwrap();

    let first_two = unsafe { interop.decode_array(table, 2, Encoding::Wide) }.unwrap();
    assert_eq!(first_two, vec![Some("one".to_string()), Some("two".to_string())]);
    interop.free(table);
}

#[test]
fn test_decode_native_table() {
    let interop = interop();
    let a = interop.encode("alpha", Encoding::Narrow).unwrap();
    let b = interop.encode("beta", Encoding::Narrow).unwrap();
    let slots = [a.addr(), 0, b.addr()];

    let decoded =
        unsafe { interop.decode_array(Handle::from_ptr(slots.as_ptr()), 3, Encoding::Narrow) }
            .unwrap();
    assert_eq!(
        decoded,
        vec![Some("alpha".to_string()), None, Some("beta".to_string())]
    );

    interop.free(a);
    interop.free(b);
}

#[test]
fn test_custom_encoder_and_decoder() {
    let interop = interop();
    let table = interop
        .encode_array_with(&["x", "yy"], |text| {
            let h = interop.allocate(1)?;
            interop.write_block(h, 0, &[text.len() as u8])?;
            Ok(h)
        })
        .unwrap();
    assert_eq!(interop.block_len(table), Some(2 * size_of::<usize>()));

    let lengths = unsafe {
        interop.decode_array_with(table, 2, |h| interop.read_block(h).map(|b| b[0]))
    }
    .unwrap();
    assert_eq!(lengths, vec![Some(1), Some(2)]);

    assert!(interop.free(table));
    assert_drained(&interop);
}

#[test]
fn test_failing_custom_encoder_releases_partial_work() {
    let interop = interop();
    let mut calls = 0;
    let err = interop
        .encode_array_with(&["a", "b", "c"], |text| {
            calls += 1;
            if text == "c" {
                Err(InteropError::InvalidOperation("rejected".into()))
            } else {
                interop.encode(text, Encoding::Wide)
            }
        })
        .unwrap_err();

    assert!(matches!(err, InteropError::InvalidOperation(_)));
    assert_eq!(calls, 3);
    assert_drained(&interop);
}

#[test]
fn test_nested_scope_array_is_released_once() {
    let interop = interop();
    {
        let mut scope = interop.scope();
        scope.encode_array(&["p", "q"], Encoding::BStr).unwrap();
        assert_eq!(interop.live_blocks(), 3);
    }
    assert_drained(&interop);
}
