//! The per-call view of one index: definition, pages, root and free list.

use buffer::PageStore;
use catalog::KeyDefinition;
use common::{IndexResult, PageAddr};
use storage::IndexPage;

use crate::corrupt;
use crate::node::NodeImage;

/// Deepest tree a walk accepts before calling the index damaged.
pub(crate) const MAX_DEPTH: usize = 64;

/// Everything an index operation touches.
///
/// The root cell and free-list head are borrowed from the key file state and
/// updated in place.
pub(crate) struct Tree<'a, S: PageStore> {
    pub index: usize,
    pub def: &'a KeyDefinition,
    pub store: &'a mut S,
    pub root: &'a mut Option<PageAddr>,
    pub free_list: &'a mut Option<PageAddr>,
}

impl<S: PageStore> Tree<'_, S> {
    /// Fail once a descent has gone deeper than any sound tree could be.
    ///
    /// A child pointer leading back to an ancestor ends here as `Crashed`.
    pub fn check_depth(&self, depth: usize) -> IndexResult<()> {
        if depth > MAX_DEPTH {
            return Err(corrupt(format!(
                "index {} is deeper than {MAX_DEPTH} levels",
                self.index
            )));
        }
        Ok(())
    }

    pub fn fetch(&mut self, addr: PageAddr) -> IndexResult<IndexPage> {
        self.store.fetch(addr, self.def.block_length)
    }

    pub fn write(&mut self, page: &IndexPage) -> IndexResult<()> {
        self.store.write(page)
    }

    /// A fresh, empty page of the requested kind.
    pub fn allocate(&mut self, internal: bool) -> IndexResult<IndexPage> {
        let addr = self.store.allocate(self.free_list, self.def.block_length)?;
        Ok(IndexPage::new(addr, self.def.block_length, internal))
    }

    pub fn free(&mut self, addr: PageAddr) -> IndexResult<()> {
        self.store.free(self.free_list, addr, self.def.block_length)
    }

    /// Write `image` into `page` and store it.
    pub fn store_image(&mut self, image: &NodeImage, page: &mut IndexPage) -> IndexResult<()> {
        image.write(self.def, page)?;
        self.write(page)
    }
}
