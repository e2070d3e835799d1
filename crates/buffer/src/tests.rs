use super::*;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

const BLOCK: usize = 1024;

fn config(cache_blocks: usize) -> Config {
    Config::builder().cache_blocks(cache_blocks).build()
}

fn leaf_with(addr: PageAddr, body: &[u8]) -> IndexPage {
    let mut page = IndexPage::new(addr, BLOCK, false);
    page.extend(body);
    page
}

#[test]
fn allocate_and_fetch_persist_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");
    let mut free = None;
    let addr = {
        let mut pager = FilePager::create(&path, &config(2)).unwrap();
        let addr = pager.allocate(&mut free, BLOCK).unwrap();
        pager.write(&leaf_with(addr, &[1, 2, 3, 4])).unwrap();
        pager.flush().unwrap();
        addr
    };

    let mut pager = FilePager::open(&path, &config(2)).unwrap();
    let page = pager.fetch(addr, BLOCK).unwrap();
    assert_eq!(&page.data()[2..], &[1, 2, 3, 4]);
    assert!(!page.is_internal());
}

#[test]
fn empty_cache_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");
    assert!(matches!(
        FilePager::create(&path, &config(0)),
        Err(IndexError::InvalidDefinition(_))
    ));
    assert!(!path.exists());

    FilePager::create(&path, &config(2)).unwrap();
    assert!(matches!(
        FilePager::open(&path, &config(0)),
        Err(IndexError::InvalidDefinition(_))
    ));
}

#[test]
fn allocation_extends_file_in_block_steps() {
    let dir = tempdir().unwrap();
    let mut pager = FilePager::create(dir.path().join("t.idx"), &config(10)).unwrap();
    let mut free = None;

    let a = pager.allocate(&mut free, BLOCK).unwrap();
    let b = pager.allocate(&mut free, BLOCK).unwrap();
    let c = pager.allocate(&mut free, 512).unwrap();

    assert_eq!(a, PageAddr(1024));
    assert_eq!(b, PageAddr(2048));
    assert_eq!(c, PageAddr(3072));
    assert_eq!(pager.file_length(), 3584);
}

#[test]
fn lru_eviction_flushes_dirty_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");
    let mut free = None;
    let first = {
        let mut pager = FilePager::create(&path, &config(1)).unwrap();
        let first = pager.allocate(&mut free, BLOCK).unwrap();
        pager.write(&leaf_with(first, &[99])).unwrap();
        // Allocating again evicts the first block and writes it out.
        let second = pager.allocate(&mut free, BLOCK).unwrap();
        pager.write(&leaf_with(second, &[7])).unwrap();
        pager.flush().unwrap();
        first
    };

    let mut pager = FilePager::open(&path, &config(2)).unwrap();
    assert_eq!(&pager.fetch(first, BLOCK).unwrap().data()[2..], &[99]);
}

#[test]
fn freed_pages_are_reused_lifo() {
    let dir = tempdir().unwrap();
    let mut pager = FilePager::create(dir.path().join("t.idx"), &config(4)).unwrap();
    let mut free = None;

    let a = pager.allocate(&mut free, BLOCK).unwrap();
    let b = pager.allocate(&mut free, BLOCK).unwrap();
    pager.free(&mut free, a, BLOCK).unwrap();
    pager.free(&mut free, b, BLOCK).unwrap();
    assert_eq!(free, Some(b));

    assert_eq!(pager.allocate(&mut free, BLOCK).unwrap(), b);
    assert_eq!(pager.allocate(&mut free, BLOCK).unwrap(), a);
    assert_eq!(free, None);
    assert_eq!(pager.file_length(), 3072);
}

#[test]
fn free_list_survives_eviction() {
    let dir = tempdir().unwrap();
    let mut pager = FilePager::create(dir.path().join("t.idx"), &config(1)).unwrap();
    let mut free = None;

    let a = pager.allocate(&mut free, BLOCK).unwrap();
    let b = pager.allocate(&mut free, BLOCK).unwrap();
    pager.free(&mut free, a, BLOCK).unwrap();
    pager.free(&mut free, b, BLOCK).unwrap();
    // Touch another block so the freed ones are read back from disk.
    let c = pager.allocate(&mut Option::None, BLOCK).unwrap();
    pager.write(&leaf_with(c, &[1])).unwrap();

    assert_eq!(pager.allocate(&mut free, BLOCK).unwrap(), b);
    assert_eq!(pager.allocate(&mut free, BLOCK).unwrap(), a);
}

#[test]
fn allocation_past_limit_is_index_full() {
    let dir = tempdir().unwrap();
    let config = Config::builder().max_key_file_length(3072).build();
    let mut pager = FilePager::create(dir.path().join("t.idx"), &config).unwrap();
    let mut free = None;

    pager.allocate(&mut free, BLOCK).unwrap();
    pager.allocate(&mut free, BLOCK).unwrap();
    let err = pager.allocate(&mut free, BLOCK).unwrap_err();
    assert!(matches!(err, IndexError::IndexFull));
    assert_eq!(pager.file_length(), 3072);
}

#[test]
fn fetch_outside_file_is_crashed() {
    let dir = tempdir().unwrap();
    let mut pager = FilePager::create(dir.path().join("t.idx"), &config(4)).unwrap();

    assert!(pager.fetch(PageAddr(4096), BLOCK).unwrap_err().is_crashed());
    assert!(pager.fetch(PageAddr(0), BLOCK).unwrap_err().is_crashed());
    assert!(pager.fetch(PageAddr(1100), BLOCK).unwrap_err().is_crashed());
}

#[test]
fn state_block_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");
    let mut block = vec![0u8; STATE_BLOCK_LEN];
    block[..4].copy_from_slice(&[9, 8, 7, 6]);
    {
        let mut pager = FilePager::create(&path, &config(4)).unwrap();
        pager.write_state(&block).unwrap();
        pager.flush().unwrap();
    }
    let mut pager = FilePager::open(&path, &config(4)).unwrap();
    assert_eq!(pager.read_state().unwrap(), block);
}

#[test]
fn open_missing_file_fails() {
    let dir = tempdir().unwrap();
    let err = FilePager::open(dir.path().join("missing.idx"), &config(4)).unwrap_err();
    assert!(err.is_crashed());
}
