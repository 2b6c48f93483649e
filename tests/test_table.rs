// tests/test_table.rs — contour-table decoding through the public API.
//
// Integration tests only see the crate's public surface. Filling a
// table is the device's job (the mutable byte view is crate-internal),
// so decode behaviour on crafted contents is covered by the unit tests
// next to the type; this file checks the publicly reachable pieces.

use token_trace::{ContourTable, TableDecodeError};

#[test]
fn test_fresh_table_decodes_empty() {
    let table = ContourTable::new(9, 8);
    assert_eq!(table.contours().unwrap().len(), 0);
    assert_eq!(table.width(), 9);
    assert_eq!(table.height(), 8);
    assert_eq!(table.capacity(), 8);
}

#[test]
fn test_row_accessor_matches_layout() {
    let table = ContourTable::new(5, 3);
    assert_eq!(table.row(0).len(), 5);
    assert_eq!(table.row(2).len(), 5);
    assert_eq!(table.as_bytes().len(), 4 * 5 * 3);
}

#[test]
fn test_decode_error_messages_name_the_row() {
    let odd = TableDecodeError::OddCount { row: 2, count: 5 };
    assert!(odd.to_string().contains("row 2"));
    let over = TableDecodeError::CountOverflow { row: 1, count: 40, capacity: 8 };
    assert!(over.to_string().contains("capacity is 8"));
}
