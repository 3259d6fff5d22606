//! # Sorted positions
//! Index of the active positions, riskiest first. With a single collateral type the order by nominal
//! collateral ratio (collateral / debt) is also the order by ICR at any price, which is the order
//! liquidations and redemptions walk the positions in.
//!
//! Positions are not stored under their NICR itself: a redistribution changes the NICR of every position
//! without touching the index. They are stored under their [`sort_key`](crate::position_ledger::sort_key),
//! which orders exactly like the current NICR (pending rewards included) and which redistributions leave
//! alone.

use crate::errors::*;
use scrypto::prelude::*;
use scrypto_avltree::AvlTree;

pub trait PositionIndex {
    fn insert(&mut self, id: NonFungibleLocalId, key: Decimal) -> ProtocolResult<()>;
    /// Fails with `InvalidState` when the position is not stored under `key`.
    fn remove(&mut self, id: &NonFungibleLocalId, key: Decimal) -> ProtocolResult<()>;
    fn contains(&self, id: &NonFungibleLocalId, key: Decimal) -> bool;
    /// Walks the index from the riskiest position up. Positions sharing a key come in insertion order.
    fn ascending(&self) -> Box<dyn Iterator<Item = (Decimal, NonFungibleLocalId)> + '_>;

    /// Moves a position from one key to another.
    fn reinsert(&mut self, id: NonFungibleLocalId, old_key: Decimal, new_key: Decimal) -> ProtocolResult<()> {
        if old_key == new_key && self.contains(&id, new_key) {
            return Ok(());
        }
        self.remove(&id, old_key)?;
        self.insert(id, new_key)
    }
}

/// `PositionIndex` on an AvlTree holding a vector of position ids per key.
#[derive(ScryptoSbor)]
pub struct PositionTree {
    tree: AvlTree<Decimal, Vec<NonFungibleLocalId>>,
    max_vector_length: u64,
}

impl PositionTree {
    pub fn new(max_vector_length: u64) -> Self {
        Self {
            tree: AvlTree::new(),
            max_vector_length,
        }
    }

    pub fn set_max_vector_length(&mut self, max_vector_length: u64) {
        self.max_vector_length = max_vector_length;
    }
}

impl PositionIndex for PositionTree {
    fn insert(&mut self, id: NonFungibleLocalId, key: Decimal) -> ProtocolResult<()> {
        let mut ids: Vec<NonFungibleLocalId> = match self.tree.get_mut(&key) {
            Some(ids) => ids.to_vec(),
            None => vec![],
        };

        if ids.len() as u64 >= self.max_vector_length {
            return Err(ProtocolError::invalid_state(
                "Ratio vector is full... Try a slightly different collateral / debt ratio.",
            ));
        }

        ids.push(id);
        self.tree.insert(key, ids);
        Ok(())
    }

    fn remove(&mut self, id: &NonFungibleLocalId, key: Decimal) -> ProtocolResult<()> {
        let mut ids: Vec<NonFungibleLocalId> = match self.tree.get_mut(&key) {
            Some(ids) => ids.to_vec(),
            None => return Err(ProtocolError::invalid_state("Position key not found in the index.")),
        };

        let before = ids.len();
        ids.retain(|stored| stored != id);
        if ids.len() == before {
            return Err(ProtocolError::invalid_state("Position not found under its key in the index."));
        }

        if ids.is_empty() {
            self.tree.remove(&key);
        } else {
            self.tree.insert(key, ids);
        }
        Ok(())
    }

    fn contains(&self, id: &NonFungibleLocalId, key: Decimal) -> bool {
        self.tree
            .range(key..)
            .next()
            .map(|(stored_key, ids, _)| stored_key == key && ids.contains(id))
            .unwrap_or(false)
    }

    fn ascending(&self) -> Box<dyn Iterator<Item = (Decimal, NonFungibleLocalId)> + '_> {
        Box::new(
            self.tree
                .range(Decimal::MIN..)
                .flat_map(|(key, ids, _next)| ids.into_iter().map(move |id| (key, id))),
        )
    }
}
