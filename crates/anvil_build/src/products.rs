//! Session-local table of products, keyed by source content.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use anvil_common::Fingerprint;

use crate::asset::{ProductRef, SourceAsset};

enum SlotState {
    Building,
    Done(ProductRef),
}

struct Slot {
    asset: Arc<SourceAsset>,
    state: SlotState,
}

/// Outcome of [`BuiltProductTable::claim`].
pub(crate) enum Claim<'t> {
    /// The content was already built this session.
    Ready(ProductRef),
    /// The caller must build it and fulfil the guard.
    Owner(SlotGuard<'t>),
}

/// Products built this session, keyed by content fingerprint.
///
/// Each key holds one slot per distinct asset value that hashed to it; two
/// assets share a slot when they are the same `Arc` or compare equal. A slot
/// that is still building makes other claimants wait on the condvar, so the
/// transform runs once per content. The lock is never held while building.
#[derive(Default)]
pub(crate) struct BuiltProductTable {
    slots: Mutex<HashMap<Fingerprint, Vec<Slot>>>,
    settled: Condvar,
}

fn same_asset(a: &Arc<SourceAsset>, b: &SourceAsset) -> bool {
    std::ptr::eq(Arc::as_ptr(a), b) || **a == *b
}

impl BuiltProductTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, Vec<Slot>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the finished product for `asset` without waiting or building.
    pub(crate) fn lookup(&self, key: Fingerprint, asset: &SourceAsset) -> Option<ProductRef> {
        self.lock()
            .get(&key)?
            .iter()
            .find(|slot| same_asset(&slot.asset, asset))
            .and_then(|slot| match &slot.state {
                SlotState::Done(product) => Some(Arc::clone(product)),
                SlotState::Building => None,
            })
    }

    /// Returns the finished product for `asset`, waiting if another worker
    /// is building it, or makes the caller the builder.
    pub(crate) fn claim(&self, key: Fingerprint, asset: &Arc<SourceAsset>) -> Claim<'_> {
        let mut slots = self.lock();
        loop {
            let existing = slots
                .get(&key)
                .and_then(|list| list.iter().find(|slot| same_asset(&slot.asset, asset)))
                .map(|slot| match &slot.state {
                    SlotState::Done(product) => Some(Arc::clone(product)),
                    SlotState::Building => None,
                });
            match existing {
                Some(Some(product)) => return Claim::Ready(product),
                Some(None) => {
                    slots = self
                        .settled
                        .wait(slots)
                        .unwrap_or_else(|e| e.into_inner());
                }
                None => {
                    slots.entry(key).or_default().push(Slot {
                        asset: Arc::clone(asset),
                        state: SlotState::Building,
                    });
                    return Claim::Owner(SlotGuard {
                        table: self,
                        key,
                        asset: Arc::clone(asset),
                        settled: false,
                    });
                }
            }
        }
    }

    /// Records a product obtained without a claim, e.g. from the content cache.
    pub(crate) fn record(
        &self,
        key: Fingerprint,
        asset: &Arc<SourceAsset>,
        product: &ProductRef,
    ) {
        let mut slots = self.lock();
        let list = slots.entry(key).or_default();
        if !list.iter().any(|slot| same_asset(&slot.asset, asset)) {
            list.push(Slot {
                asset: Arc::clone(asset),
                state: SlotState::Done(Arc::clone(product)),
            });
        }
    }

    /// Drops every finished product. Slots still building stay so their
    /// owners can settle them and wake any waiter.
    pub(crate) fn clear(&self) {
        let mut slots = self.lock();
        slots.retain(|_, list| {
            list.retain(|slot| matches!(slot.state, SlotState::Building));
            !list.is_empty()
        });
    }

    /// Number of finished products.
    pub(crate) fn len(&self) -> usize {
        self.lock()
            .values()
            .flatten()
            .filter(|slot| matches!(slot.state, SlotState::Done(_)))
            .count()
    }

    fn settle(&self, key: Fingerprint, asset: &Arc<SourceAsset>, product: Option<ProductRef>) {
        let mut slots = self.lock();
        if let Some(list) = slots.get_mut(&key) {
            if let Some(pos) = list.iter().position(|slot| {
                matches!(slot.state, SlotState::Building) && same_asset(&slot.asset, asset)
            }) {
                match product {
                    Some(product) => list[pos].state = SlotState::Done(product),
                    None => {
                        list.remove(pos);
                    }
                }
            }
        }
        self.settled.notify_all();
    }
}

/// Exclusive right to build one content. Dropping it unfulfilled releases the
/// slot so a waiting claimant can try instead.
pub(crate) struct SlotGuard<'t> {
    table: &'t BuiltProductTable,
    key: Fingerprint,
    asset: Arc<SourceAsset>,
    settled: bool,
}

impl SlotGuard<'_> {
    /// Publishes the product to every waiter.
    pub(crate) fn fulfil(mut self, product: ProductRef) {
        self.settled = true;
        self.table.settle(self.key, &self.asset, Some(product));
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.table.settle(self.key, &self.asset, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Product;
    use anvil_common::FingerprintBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key() -> Fingerprint {
        FingerprintBuilder::new("k").finish()
    }

    fn asset(data: &str) -> Arc<SourceAsset> {
        Arc::new(SourceAsset::new("material", data.as_bytes().to_vec()))
    }

    #[test]
    fn structurally_equal_assets_share_a_product() {
        let table = BuiltProductTable::default();
        let first = asset("red");
        let Claim::Owner(guard) = table.claim(key(), &first) else {
            panic!("first claim must own");
        };
        guard.fulfil(Arc::new(Product::new(b"compiled".to_vec())));

        let twin = asset("red");
        match table.claim(key(), &twin) {
            Claim::Ready(p) => assert_eq!(p.bytes(), b"compiled"),
            Claim::Owner(_) => panic!("equal content must be reused"),
        }
        assert!(table.lookup(key(), &twin).is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn colliding_key_with_different_content_builds_separately() {
        let table = BuiltProductTable::default();
        let Claim::Owner(guard) = table.claim(key(), &asset("red")) else {
            panic!("must own");
        };
        guard.fulfil(Arc::new(Product::new(b"r".to_vec())));
        assert!(matches!(table.claim(key(), &asset("blue")), Claim::Owner(_)));
    }

    #[test]
    fn abandoned_claim_lets_the_next_caller_build() {
        let table = BuiltProductTable::default();
        let a = asset("red");
        match table.claim(key(), &a) {
            Claim::Owner(guard) => drop(guard),
            Claim::Ready(_) => panic!("must own"),
        }
        assert!(table.lookup(key(), &a).is_none());
        assert!(matches!(table.claim(key(), &a), Claim::Owner(_)));
    }

    #[test]
    fn concurrent_claims_build_once() {
        let table = Arc::new(BuiltProductTable::default());
        let builds = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (table, builds) = (table.clone(), builds.clone());
                std::thread::spawn(move || match table.claim(key(), &asset("shared")) {
                    Claim::Owner(guard) => {
                        builds.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        let product = Arc::new(Product::new(b"once".to_vec()));
                        guard.fulfil(product.clone());
                        product
                    }
                    Claim::Ready(product) => product,
                })
            })
            .collect();
        let products: Vec<ProductRef> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(products.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn record_inserts_finished_product() {
        let table = BuiltProductTable::default();
        let a = asset("x");
        table.record(key(), &a, &Arc::new(Product::new(b"p".to_vec())));
        assert!(matches!(table.claim(key(), &a), Claim::Ready(_)));
    }

    #[test]
    fn clear_forgets_finished_products_but_keeps_pending_claims() {
        let table = BuiltProductTable::default();
        let done = asset("done");
        table.record(key(), &done, &Arc::new(Product::new(b"old".to_vec())));
        let pending = asset("pending");
        let Claim::Owner(guard) = table.claim(key(), &pending) else {
            panic!("must own");
        };

        table.clear();
        assert_eq!(table.len(), 0);
        assert!(table.lookup(key(), &done).is_none());

        guard.fulfil(Arc::new(Product::new(b"new".to_vec())));
        assert_eq!(table.lookup(key(), &pending).unwrap().bytes(), b"new");
        assert!(matches!(table.claim(key(), &done), Claim::Owner(_)));
    }
}
