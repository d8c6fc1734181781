use super::*;

// -------------------- put / get / delete --------------------

#[test]
fn put_then_get() {
    let mut m = Memtable::new();
    m.put(b"my key".to_vec(), b"my value".to_vec(), 1);
    assert_eq!(m.get(b"my key"), Some((1, b"my value".to_vec())));
    assert!(m.get(b"other").is_none());
}

#[test]
fn newer_seq_overwrites_and_stale_seq_is_ignored() {
    let mut m = Memtable::new();
    m.put(b"k".to_vec(), b"v1".to_vec(), 4);
    m.put(b"k".to_vec(), b"v2".to_vec(), 7);
    m.put(b"k".to_vec(), b"late".to_vec(), 5);
    m.put(b"k".to_vec(), b"same".to_vec(), 7);
    assert_eq!(m.get(b"k"), Some((7, b"v2".to_vec())));
}

#[test]
fn delete_leaves_tombstone_entry() {
    let mut m = Memtable::new();
    m.put(b"k".to_vec(), b"v".to_vec(), 1);
    m.delete(b"k".to_vec(), 2);

    assert!(m.get(b"k").is_none());
    assert!(m.contains_key(b"k"));
    let entry = m.get_entry(b"k").unwrap();
    assert!(entry.is_tombstone());
    assert_eq!(entry.seq, 2);
    assert_eq!(m.len(), 1);
}

#[test]
fn stale_delete_does_not_hide_newer_put() {
    let mut m = Memtable::new();
    m.put(b"k".to_vec(), b"v".to_vec(), 10);
    m.delete(b"k".to_vec(), 9);
    assert_eq!(m.get(b"k").unwrap().1, b"v");
}

#[test]
fn put_after_delete_resurrects() {
    let mut m = Memtable::new();
    m.delete(b"k".to_vec(), 1);
    m.put(b"k".to_vec(), b"back".to_vec(), 2);
    assert_eq!(m.get(b"k").unwrap().1, b"back");
}

// -------------------- ordering --------------------

#[test]
fn iter_is_sorted_and_includes_tombstones() {
    let mut m = Memtable::new();
    m.put(b"c".to_vec(), b"3".to_vec(), 1);
    m.put(b"a".to_vec(), b"1".to_vec(), 2);
    m.delete(b"b".to_vec(), 3);

    let keys: Vec<&[u8]> = m.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(keys, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    assert!(m.iter().nth(1).unwrap().1.is_tombstone());
}

// -------------------- size and sequence tracking --------------------

#[test]
fn approx_size_counts_keys_and_values() {
    let mut m = Memtable::new();
    assert_eq!(m.approx_size(), 0);
    m.put(b"ab".to_vec(), b"xyz".to_vec(), 1);
    assert_eq!(m.approx_size(), 5);
    m.put(b"ab".to_vec(), b"x".to_vec(), 2);
    assert_eq!(m.approx_size(), 3);
    m.delete(b"ab".to_vec(), 3);
    assert_eq!(m.approx_size(), 2);
}

#[test]
fn stale_write_leaves_size_unchanged() {
    let mut m = Memtable::new();
    m.put(b"k".to_vec(), b"value".to_vec(), 5);
    let before = m.approx_size();
    m.put(b"k".to_vec(), b"a much longer value".to_vec(), 1);
    assert_eq!(m.approx_size(), before);
}

#[test]
fn max_seq_tracks_highest_applied() {
    let mut m = Memtable::new();
    assert_eq!(m.max_seq(), 0);
    m.put(b"a".to_vec(), b"1".to_vec(), 3);
    m.delete(b"b".to_vec(), 9);
    m.put(b"a".to_vec(), b"2".to_vec(), 2); // stale, ignored
    assert_eq!(m.max_seq(), 9);
}

#[test]
fn clear_resets_everything() {
    let mut m = Memtable::new();
    for i in 0..100u64 {
        m.put(format!("k{}", i).into_bytes(), vec![b'x'; 16], i + 1);
    }
    assert!(!m.is_empty());
    m.clear();
    assert!(m.is_empty());
    assert_eq!(m.len(), 0);
    assert_eq!(m.approx_size(), 0);
    assert_eq!(m.max_seq(), 0);

    m.put(b"again".to_vec(), b"v".to_vec(), 1);
    assert_eq!(m.len(), 1);
}

// -------------------- workloads --------------------

#[test]
fn key_reuse_bounds_entry_count() {
    let mut m = Memtable::new();
    let mut seq = 0;
    for i in 0..50_000u64 {
        seq += 1;
        m.put(format!("key{}", i % 500).into_bytes(), vec![b'v'; 32], seq);
    }
    assert_eq!(m.len(), 500);
    assert_eq!(m.approx_size(), m.iter().map(|(k, e)| k.len() + e.value.as_ref().unwrap().len()).sum::<usize>());
}

#[test]
fn binary_keys_and_empty_values() {
    let mut m = Memtable::new();
    m.put(vec![0x00, 0xff, 0x10], Vec::new(), 1);
    assert_eq!(m.get(&[0x00, 0xff, 0x10]), Some((1, Vec::new())));
}
