//! On-tree directories.
//!
//! A directory is a doubly-linked list of fixed-capacity index pages, each
//! a DirectoryNode entry. Page `n` lives at `dir_node_key(root, n)`; page
//! zero is the root. Pages are discovered by following `IndexNext` from the
//! root, and the root's `IndexPrevious` names the last page so appends are
//! O(1). Order books reuse the same structure with one page list per
//! quality, keyed so that tree order is best-rate-first.

use rill_common::{AccountId, Hash256};
use rill_protocol::keys::{self, Book};
use rill_protocol::{FieldId, LedgerEntry, LedgerEntryType};
use tracing::debug;

use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::{LedgerStateParms, Result};

/// Entries per directory page.
pub const DIR_NODE_MAX: usize = 32;

/// Fill the payload fields of an owner-directory page.
pub fn describe_owner_dir(owner: AccountId) -> impl FnMut(&mut LedgerEntry, bool) {
    move |entry, _is_root| {
        entry.set_account(FieldId::Owner, owner);
    }
}

/// Fill the payload fields of an order-book quality page.
pub fn describe_quality_dir(book: &Book, rate: u64) -> impl FnMut(&mut LedgerEntry, bool) {
    let book = *book;
    move |entry, _is_root| {
        entry.set_h160(FieldId::TakerPaysCurrency, *book.input.currency.as_bytes());
        entry.set_h160(FieldId::TakerPaysIssuer, *book.input.issuer.as_bytes());
        entry.set_h160(FieldId::TakerGetsCurrency, *book.output.currency.as_bytes());
        entry.set_h160(FieldId::TakerGetsIssuer, *book.output.issuer.as_bytes());
        entry.set_u64(FieldId::ExchangeRate, rate);
    }
}

fn page_indexes(page: &LedgerEntry) -> Vec<Hash256> {
    page.get_v256(FieldId::Indexes)
        .map(<[Hash256]>::to_vec)
        .unwrap_or_default()
}

impl Ledger {
    fn load_dir_page(&self, root_key: &Hash256, page: u64) -> Result<LedgerEntry> {
        let key = keys::dir_node_key(root_key, page);
        match self.entry_owned(&key)? {
            Some(entry) if entry.entry_type() == LedgerEntryType::DirectoryNode => Ok(entry),
            Some(_) => Err(LedgerError::BadDirectory(format!(
                "page {page} of {root_key} is not a directory node"
            ))),
            None => Err(LedgerError::BadDirectory(format!(
                "page {page} of {root_key} is missing"
            ))),
        }
    }

    /// Add `entry_key` to the directory rooted at `root_key`, creating the
    /// root or a fresh tail page as needed. `describe` fills payload
    /// fields on any page it creates. Returns the page number that took
    /// the entry.
    pub fn dir_add(
        &mut self,
        root_key: &Hash256,
        entry_key: &Hash256,
        describe: &mut dyn FnMut(&mut LedgerEntry, bool),
    ) -> Result<u64> {
        let root = match self.entry_owned(root_key)? {
            None => {
                // First entry: the root page is born holding it.
                let mut root = LedgerEntry::new(LedgerEntryType::DirectoryNode, *root_key);
                root.set_h256(FieldId::RootIndex, *root_key);
                root.set_v256(FieldId::Indexes, vec![*entry_key]);
                describe(&mut root, true);
                self.write_back(LedgerStateParms::CREATE, &root)?;
                debug!(root = %root_key, "created directory");
                return Ok(0);
            }
            Some(entry) if entry.entry_type() == LedgerEntryType::DirectoryNode => entry,
            Some(_) => {
                return Err(LedgerError::BadDirectory(format!(
                    "root {root_key} is not a directory node"
                )))
            }
        };

        let last_page = root.get_u64(FieldId::IndexPrevious).unwrap_or(0);
        let mut tail = if last_page == 0 {
            root
        } else {
            self.load_dir_page(root_key, last_page)?
        };

        let mut indexes = page_indexes(&tail);
        if indexes.len() < DIR_NODE_MAX {
            indexes.push(*entry_key);
            tail.set_v256(FieldId::Indexes, indexes);
            self.write_back(LedgerStateParms::NONE, &tail)?;
            return Ok(last_page);
        }

        // Tail is full: append a fresh page.
        let new_page = last_page + 1;
        let mut page = LedgerEntry::new(
            LedgerEntryType::DirectoryNode,
            keys::dir_node_key(root_key, new_page),
        );
        page.set_h256(FieldId::RootIndex, *root_key);
        page.set_v256(FieldId::Indexes, vec![*entry_key]);
        page.set_u64(FieldId::IndexPrevious, last_page);
        describe(&mut page, false);
        self.write_back(LedgerStateParms::CREATE, &page)?;

        tail.set_u64(FieldId::IndexNext, new_page);
        if last_page == 0 {
            // The tail was the root: update its last-page pointer too.
            tail.set_u64(FieldId::IndexPrevious, new_page);
            self.write_back(LedgerStateParms::NONE, &tail)?;
        } else {
            self.write_back(LedgerStateParms::NONE, &tail)?;
            let mut root = self.load_dir_page(root_key, 0)?;
            root.set_u64(FieldId::IndexPrevious, new_page);
            self.write_back(LedgerStateParms::NONE, &root)?;
        }
        debug!(root = %root_key, page = new_page, "grew directory");
        Ok(new_page)
    }

    /// Remove `entry_key` from page `page` of the directory rooted at
    /// `root_key`. Deleting the last entry of a non-root page unlinks and
    /// deletes the page; an empty root with no other pages is deleted
    /// outright.
    pub fn dir_delete(
        &mut self,
        root_key: &Hash256,
        page: u64,
        entry_key: &Hash256,
    ) -> Result<()> {
        let mut node = self.load_dir_page(root_key, page)?;
        let mut indexes = page_indexes(&node);
        let position = indexes.iter().position(|key| key == entry_key).ok_or_else(|| {
            LedgerError::BadDirectory(format!("{entry_key} not in page {page} of {root_key}"))
        })?;
        indexes.remove(position);

        if !indexes.is_empty() {
            node.set_v256(FieldId::Indexes, indexes);
            self.write_back(LedgerStateParms::NONE, &node)?;
            return Ok(());
        }

        if page == 0 {
            if node.get_u64(FieldId::IndexNext).unwrap_or(0) == 0 {
                // Whole directory gone.
                self.delete_state_entry(root_key)?;
                debug!(root = %root_key, "deleted directory");
            } else {
                // The root stays as the list head.
                node.set_v256(FieldId::Indexes, Vec::new());
                self.write_back(LedgerStateParms::NONE, &node)?;
            }
            return Ok(());
        }

        // Unlink an empty non-root page.
        let prev = node.get_u64(FieldId::IndexPrevious).unwrap_or(0);
        let next = node.get_u64(FieldId::IndexNext).unwrap_or(0);

        let mut root = self.load_dir_page(root_key, 0)?;
        if prev == 0 {
            root.set_u64(FieldId::IndexNext, next);
        } else {
            let mut prev_node = self.load_dir_page(root_key, prev)?;
            prev_node.set_u64(FieldId::IndexNext, next);
            self.write_back(LedgerStateParms::NONE, &prev_node)?;
        }
        if next == 0 {
            // Deleted the last page; the root's last-page pointer falls
            // back to its predecessor.
            root.set_u64(FieldId::IndexPrevious, prev);
        } else {
            let mut next_node = self.load_dir_page(root_key, next)?;
            next_node.set_u64(FieldId::IndexPrevious, prev);
            self.write_back(LedgerStateParms::NONE, &next_node)?;
        }
        self.write_back(LedgerStateParms::NONE, &root)?;

        let node_key = keys::dir_node_key(root_key, page);
        self.delete_state_entry(&node_key)?;
        debug!(root = %root_key, page, "unlinked directory page");
        Ok(())
    }

    /// The keys of every entry in the directory, root page first.
    ///
    /// Walks `IndexNext` from the root; the walk is bounded by the page
    /// count, so a corrupt cycle terminates with an error.
    pub fn dir_entries(&self, root_key: &Hash256) -> Result<Vec<Hash256>> {
        let mut entries = Vec::new();
        let mut current = 0u64;
        let mut visited = std::collections::HashSet::new();
        loop {
            if !visited.insert(current) {
                return Err(LedgerError::BadDirectory(format!(
                    "directory {root_key} links back to page {current}"
                )));
            }
            let key = keys::dir_node_key(root_key, current);
            let Some(dir) = self.dir_node(&key)? else {
                return Ok(entries);
            };
            entries.extend_from_slice(dir.get_v256(FieldId::Indexes).unwrap_or(&[]));
            let next = dir.get_u64(FieldId::IndexNext).unwrap_or(0);
            if next == 0 {
                return Ok(entries);
            }
            current = next;
        }
    }
}
