use super::types::{Order, Price, PriceLevel, PriceSize, Sequence, Size};
use super::view::BookView;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Maximum number of deltas held while waiting for a snapshot.
pub const MAX_BUFFER_SIZE: usize = 1000;

/// Venue rules for ordering incremental updates against the last applied id.
pub trait BookSequencer<O> {
    /// The update bridges a freshly applied snapshot.
    fn is_first_event(&self, cur_seq: Sequence, update: &Order<O>) -> bool;
    /// The update only covers ids that are already in the book.
    fn is_stale(&self, cur_seq: Sequence, update: &Order<O>) -> bool;
    /// The update directly follows the last applied one.
    fn is_next(&self, cur_seq: Sequence, update: &Order<O>) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BookAction {
    RetrieveSnapshot,
    /// Book changed, readers should be notified.
    Applied,
    /// Buffered or dropped, book unchanged.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BookState {
    Init,
    WaitingForSnapshot,
    Synchronizing,
    Processing,
}

pub struct BookFsm<O, S: BookSequencer<O>> {
    state: BookState,
    asks: BTreeMap<Price, Size>,
    bids: BTreeMap<Reverse<Price>, Size>,
    buffer: VecDeque<Order<O>>,
    cur_sequence: Sequence,
    sequencer: S,
    depth: usize,
    last_update_time: Option<DateTime<Utc>>,
    last_event_ms: Option<u64>,
}

impl<O, S> BookFsm<O, S>
where
    S: BookSequencer<O>,
{
    pub fn new(sequencer: S, depth: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(100),
            state: BookState::Init,
            asks: BTreeMap::new(),
            bids: BTreeMap::new(),
            cur_sequence: Sequence(0),
            sequencer,
            depth,
            last_update_time: None,
            last_event_ms: None,
        }
    }

    /// A snapshot has been applied and deltas are being accepted.
    pub fn is_initialized(&self) -> bool {
        matches!(self.state, BookState::Synchronizing | BookState::Processing)
    }

    pub fn last_sequence(&self) -> Sequence {
        self.cur_sequence
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn bids(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.bids.iter().map(|(Reverse(p), s)| PriceLevel::new(p.0, s.0))
    }

    pub fn asks(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.asks.iter().map(|(p, s)| PriceLevel::new(p.0, s.0))
    }

    pub fn snapshot(&self) -> BookView {
        let view = BookView::new(
            self.bids().collect(),
            self.asks().collect(),
            self.last_update_time,
            self.cur_sequence.val(),
        );
        BookView {
            event_time: self
                .last_event_ms
                .and_then(|ms| i64::try_from(ms).ok())
                .and_then(DateTime::from_timestamp_millis),
            ..view
        }
    }

    pub fn update(&mut self, order: Order<O>) -> BookAction {
        self.process_order(order)
    }

    /// Drops all levels and buffered deltas, back to the state of a new book.
    pub fn clear(&mut self) {
        self.state = BookState::Init;
        self.asks.clear();
        self.bids.clear();
        self.buffer.clear();
        self.cur_sequence = Sequence(0);
        self.last_update_time = None;
        self.last_event_ms = None;
    }

    fn process_order(&mut self, order: Order<O>) -> BookAction {
        if order.is_snapshot {
            self.apply_order(&order);
            self.state = BookState::Synchronizing;
            return self.drain_buffer();
        }

        match self.state {
            BookState::Init => {
                self.push_buffer(order);
                self.state = BookState::WaitingForSnapshot;
                BookAction::RetrieveSnapshot
            }
            BookState::WaitingForSnapshot => {
                // Buffer until we get a snapshot
                self.push_buffer(order);
                BookAction::Ignored
            }
            BookState::Synchronizing => {
                if self.sequencer.is_stale(self.cur_sequence, &order) {
                    return BookAction::Ignored;
                }

                if self.sequencer.is_first_event(self.cur_sequence, &order) {
                    self.apply_order(&order);
                    self.state = BookState::Processing;
                    return BookAction::Applied;
                }

                self.reset(order)
            }
            BookState::Processing => {
                if self.sequencer.is_stale(self.cur_sequence, &order) {
                    return BookAction::Ignored;
                }

                match self.sequencer.is_next(self.cur_sequence, &order) {
                    true => {
                        self.apply_order(&order);
                        BookAction::Applied
                    }
                    false => self.reset(order),
                }
            }
        }
    }

    fn drain_buffer(&mut self) -> BookAction {
        while let Some(buffered_order) = self.buffer.pop_front() {
            if self.process_order(buffered_order) == BookAction::RetrieveSnapshot {
                return BookAction::RetrieveSnapshot;
            }
        }

        // the snapshot itself changed the book
        BookAction::Applied
    }

    /// Gap detected. Keeps `order` and anything after it for replay on the next snapshot.
    fn reset(&mut self, order: Order<O>) -> BookAction {
        debug!(
            last_id = self.cur_sequence.val(),
            update_id = order.id.val(),
            "sequence gap, waiting for snapshot"
        );
        self.state = BookState::WaitingForSnapshot;
        self.buffer.push_front(order);
        while self.buffer.len() > MAX_BUFFER_SIZE {
            self.buffer.pop_back();
        }
        BookAction::RetrieveSnapshot
    }

    fn push_buffer(&mut self, order: Order<O>) {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            self.buffer.pop_front();
        }
        self.buffer.push_back(order);
    }

    fn apply_order(&mut self, order: &Order<O>) {
        self.cur_sequence = order.id;
        self.last_update_time = Some(Utc::now());

        if order.is_snapshot {
            self.asks.clear();
            self.bids.clear();
            self.last_event_ms = None;
        } else {
            self.last_event_ms = Some(order.ts_ms);
        }

        apply_levels(&mut self.bids, &order.bids, Reverse);
        apply_levels(&mut self.asks, &order.asks, |p| p);

        // both maps iterate best first, the tail is the worst level
        while self.bids.len() > self.depth {
            self.bids.pop_last();
        }
        while self.asks.len() > self.depth {
            self.asks.pop_last();
        }
    }
}

fn apply_levels<K: Ord>(
    side: &mut BTreeMap<K, Size>,
    changes: &[PriceSize],
    key: impl Fn(Price) -> K,
) {
    for pxsz in changes {
        match pxsz.size().is_zero() {
            true => side.remove(&key(pxsz.price())),
            false => side.insert(key(pxsz.price()), pxsz.size()),
        };
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::l2_book::types::{Order, PriceSize, Sequence};
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[test]
    fn test_basic() {
        let mut fsm = BookFsm::new(TestSequencer, 20);

        // Send inc update, expect fsm to ask to retrieve snapshot
        assert_eq!(BookAction::RetrieveSnapshot, fsm.update(inc(2, 3, 5)));
        assert_eq!(BookState::WaitingForSnapshot, fsm.state);

        // Send inc update
        assert_eq!(BookAction::Ignored, fsm.update(inc(5, 7, 10)));
        assert_eq!(BookState::WaitingForSnapshot, fsm.state);

        // Send snapshot
        assert_eq!(BookAction::Applied, fsm.update(snap(0, 0, 7)));
        assert_eq!(BookState::Processing, fsm.state);
        assert_eq!(Sequence(10), fsm.last_sequence());

        // Buffer drained
        assert_eq!(0, fsm.buffer.len());
    }

    #[test]
    fn test_first_event_not_found() {
        let mut fsm = BookFsm::new(TestSequencer, 20);

        assert_eq!(BookAction::RetrieveSnapshot, fsm.update(inc(2, 3, 5)));
        assert_eq!(BookAction::Ignored, fsm.update(inc(5, 7, 10)));

        // Snapshot is newer than everything buffered
        assert_eq!(BookAction::Applied, fsm.update(snap(0, 0, 11)));
        assert_eq!(BookState::Synchronizing, fsm.state);
        assert_eq!(0, fsm.buffer.len());

        // First event not found, send an update after snapshot
        assert_eq!(BookAction::RetrieveSnapshot, fsm.update(inc(10, 13, 14)));
        assert_eq!(BookState::WaitingForSnapshot, fsm.state);

        // The gap update is kept for the next snapshot
        assert_eq!(1, fsm.buffer.len());
        assert_eq!(BookAction::Applied, fsm.update(snap(0, 0, 13)));
        assert_eq!(BookState::Processing, fsm.state);
        assert_eq!(Sequence(14), fsm.last_sequence());
    }

    #[test]
    fn test_gap_while_processing() {
        let mut fsm = BookFsm::new(TestSequencer, 20);
        fsm.update(snap(0, 0, 5));
        assert_eq!(BookAction::Applied, fsm.update(inc(4, 5, 6)));
        assert_eq!(BookAction::Applied, fsm.update(inc(6, 7, 8)));

        // stale replay is dropped without touching the book
        assert_eq!(BookAction::Ignored, fsm.update(inc(4, 5, 6)));
        assert_eq!(Sequence(8), fsm.last_sequence());

        // missing 9..10
        assert_eq!(BookAction::RetrieveSnapshot, fsm.update(inc(10, 11, 12)));
        assert!(!fsm.is_initialized());
    }

    #[test]
    fn deltas_never_touch_uninitialized_book() {
        let mut fsm = BookFsm::new(AcceptAll, 20);
        fsm.update(delta(&[(dec!(100), dec!(1))], &[(dec!(101), dec!(1))]));
        fsm.update(delta(&[(dec!(99), dec!(1))], &[]));

        assert!(!fsm.is_initialized());
        assert_eq!(0, fsm.bids().count());
        assert_eq!(0, fsm.asks().count());
        assert_eq!(2, fsm.buffered());
    }

    #[test]
    fn buffer_is_bounded() {
        let mut fsm = BookFsm::new(AcceptAll, 20);
        for _ in 0..MAX_BUFFER_SIZE + 10 {
            fsm.update(delta(&[], &[]));
        }
        assert_eq!(MAX_BUFFER_SIZE, fsm.buffered());
    }

    #[test]
    fn snapshot_then_delta() {
        let mut fsm = BookFsm::new(AcceptAll, 20);
        fsm.update(snapshot(&[(dec!(100), dec!(2)), (dec!(99), dec!(1))], &[(dec!(101), dec!(3))]));
        fsm.update(delta(&[(dec!(100), dec!(0)), (dec!(98), dec!(5))], &[]));

        let bids: Vec<_> = fsm.bids().collect();
        assert_eq!(
            bids,
            vec![PriceLevel::new(dec!(99), dec!(1)), PriceLevel::new(dec!(98), dec!(5))]
        );
        assert_eq!(vec![PriceLevel::new(dec!(101), dec!(3))], fsm.asks().collect::<Vec<_>>());
    }

    #[test]
    fn snapshot_order_is_not_trusted() {
        let mut fsm = BookFsm::new(AcceptAll, 20);
        fsm.update(snapshot(
            &[(dec!(98), dec!(1)), (dec!(100), dec!(1)), (dec!(99), dec!(1))],
            &[(dec!(103), dec!(1)), (dec!(101), dec!(1)), (dec!(102), dec!(0))],
        ));

        let bids: Vec<_> = fsm.bids().map(|l| l.price).collect();
        let asks: Vec<_> = fsm.asks().map(|l| l.price).collect();
        assert_eq!(vec![dec!(100), dec!(99), dec!(98)], bids);
        // zero quantity level never stored
        assert_eq!(vec![dec!(101), dec!(103)], asks);
    }

    #[test]
    fn tombstone_law() {
        let mut fsm = BookFsm::new(AcceptAll, 20);
        fsm.update(snapshot(
            &[(dec!(100), dec!(1)), (dec!(99), dec!(2))],
            &[(dec!(101), dec!(1))],
        ));

        // absent price: no-op
        let absent = delta(&[(dec!(97), dec!(0))], &[(dec!(105), dec!(0))]);
        assert_eq!(BookAction::Applied, fsm.update(absent));
        assert_eq!(2, fsm.bids().count());
        assert_eq!(1, fsm.asks().count());

        // present price: removes exactly that level
        fsm.update(delta(&[(dec!(99), dec!(0))], &[]));
        assert_eq!(vec![PriceLevel::new(dec!(100), dec!(1))], fsm.bids().collect::<Vec<_>>());
        assert_eq!(1, fsm.asks().count());
    }

    #[test]
    fn replace_law() {
        let mut fsm = BookFsm::new(AcceptAll, 20);
        fsm.update(snapshot(&[(dec!(100), dec!(1))], &[]));
        fsm.update(delta(&[(dec!(100), dec!(4)), (dec!(100), dec!(7))], &[]));
        assert_eq!(vec![PriceLevel::new(dec!(100), dec!(7))], fsm.bids().collect::<Vec<_>>());

        // last pair wins even when it is a tombstone
        fsm.update(delta(&[(dec!(100), dec!(3)), (dec!(100), dec!(0))], &[]));
        assert_eq!(0, fsm.bids().count());
    }

    #[test]
    fn depth_limit_trims_worst_levels() {
        let mut fsm = BookFsm::new(AcceptAll, 3);
        let bids: Vec<_> = (90..100).map(|p| (Decimal::from(p), dec!(1))).collect();
        let asks: Vec<_> = (100..110).map(|p| (Decimal::from(p), dec!(1))).collect();
        fsm.update(snapshot(&bids, &asks));

        let prices = |levels: Vec<PriceLevel>| levels.iter().map(|l| l.price).collect::<Vec<_>>();

        assert_eq!(vec![dec!(99), dec!(98), dec!(97)], prices(fsm.bids().collect()));
        assert_eq!(vec![dec!(100), dec!(101), dec!(102)], prices(fsm.asks().collect()));

        fsm.update(delta(&[(dec!(99.5), dec!(1))], &[(dec!(99.9), dec!(2))]));
        assert_eq!(vec![dec!(99.5), dec!(99), dec!(98)], prices(fsm.bids().collect()));
        assert_eq!(vec![dec!(99.9), dec!(100), dec!(101)], prices(fsm.asks().collect()));
    }

    #[test]
    fn clear_releases_state() {
        let mut fsm = BookFsm::new(AcceptAll, 20);
        fsm.update(snapshot(&[(dec!(100), dec!(1))], &[(dec!(101), dec!(1))]));
        fsm.clear();
        assert!(!fsm.is_initialized());
        assert_eq!(0, fsm.bids().count());
        assert!(fsm.snapshot().last_update_time.is_none());
    }

    #[test]
    fn event_time_follows_deltas() {
        let mut fsm = BookFsm::new(AcceptAll, 20);
        fsm.update(snapshot(&[(dec!(100), dec!(1))], &[]));
        assert_eq!(None, fsm.snapshot().event_time);

        fsm.update(Order {
            ts_ms: 1571889248277,
            ..delta(&[(dec!(99), dec!(1))], &[])
        });
        assert_eq!(
            DateTime::from_timestamp_millis(1571889248277),
            fsm.snapshot().event_time
        );

        // a new snapshot has no event time of its own
        fsm.update(snapshot(&[(dec!(100), dec!(1))], &[]));
        assert_eq!(None, fsm.snapshot().event_time);
    }

    fn level() -> impl Strategy<Value = (Decimal, Decimal)> {
        // small price range so batches hit the same keys often
        (90u32..110, 0u32..4).prop_map(|(p, q)| (Decimal::from(p), Decimal::from(q)))
    }

    fn batch() -> impl Strategy<Value = (Vec<(Decimal, Decimal)>, Vec<(Decimal, Decimal)>)> {
        (prop::collection::vec(level(), 0..12), prop::collection::vec(level(), 0..12))
    }

    proptest! {
        #[test]
        fn invariants_hold_for_any_delta_sequence(
            depth in 1usize..8,
            snap_levels in batch(),
            deltas in prop::collection::vec(batch(), 0..20),
        ) {
            let mut fsm = BookFsm::new(AcceptAll, depth);
            fsm.update(snapshot(&snap_levels.0, &snap_levels.1));
            for (bids, asks) in &deltas {
                fsm.update(delta(bids, asks));

                let bids: Vec<_> = fsm.bids().collect();
                let asks: Vec<_> = fsm.asks().collect();
                prop_assert!(bids.len() <= depth && asks.len() <= depth);
                // strict ordering implies uniqueness
                prop_assert!(bids.windows(2).all(|w| w[0].price > w[1].price));
                prop_assert!(asks.windows(2).all(|w| w[0].price < w[1].price));
                prop_assert!(bids.iter().chain(asks.iter()).all(|l| l.quantity > Decimal::ZERO));
            }
        }

        #[test]
        fn replaying_a_delta_is_idempotent(snap_levels in batch(), change in batch()) {
            let mut once = BookFsm::new(AcceptAll, 20);
            once.update(snapshot(&snap_levels.0, &snap_levels.1));
            once.update(delta(&change.0, &change.1));

            let mut twice = BookFsm::new(AcceptAll, 20);
            twice.update(snapshot(&snap_levels.0, &snap_levels.1));
            twice.update(delta(&change.0, &change.1));
            twice.update(delta(&change.0, &change.1));

            prop_assert_eq!(once.bids().collect::<Vec<_>>(), twice.bids().collect::<Vec<_>>());
            prop_assert_eq!(once.asks().collect::<Vec<_>>(), twice.asks().collect::<Vec<_>>());
        }
    }

    struct TestOrder {
        pub prev_seq: Sequence,
        pub start_seq: Sequence,
        pub end_seq: Sequence,
    }

    struct TestSequencer;

    impl BookSequencer<TestOrder> for TestSequencer {
        fn is_first_event(&self, cur_seq: Sequence, update: &Order<TestOrder>) -> bool {
            update.o.start_seq <= cur_seq && cur_seq <= update.o.end_seq
        }

        fn is_stale(&self, cur_seq: Sequence, update: &Order<TestOrder>) -> bool {
            update.o.end_seq <= cur_seq
        }

        fn is_next(&self, cur_seq: Sequence, update: &Order<TestOrder>) -> bool {
            cur_seq == update.o.prev_seq
        }
    }

    struct AcceptAll;

    impl BookSequencer<()> for AcceptAll {
        fn is_first_event(&self, _: Sequence, _: &Order<()>) -> bool {
            true
        }

        fn is_stale(&self, _: Sequence, _: &Order<()>) -> bool {
            false
        }

        fn is_next(&self, _: Sequence, _: &Order<()>) -> bool {
            true
        }
    }

    fn mk_order(is_snapshot: bool, o: TestOrder) -> Order<TestOrder> {
        Order {
            id: o.end_seq,
            bids: vec![],
            asks: vec![],
            is_snapshot,
            ts_ms: 0,
            o,
        }
    }

    fn inc(prev: u64, start: u64, end: u64) -> Order<TestOrder> {
        mk_order(
            false,
            TestOrder {
                prev_seq: Sequence(prev),
                start_seq: Sequence(start),
                end_seq: Sequence(end),
            },
        )
    }

    fn snap(prev: u64, start: u64, end: u64) -> Order<TestOrder> {
        mk_order(
            true,
            TestOrder {
                prev_seq: Sequence(prev),
                start_seq: Sequence(start),
                end_seq: Sequence(end),
            },
        )
    }

    fn levels(raw: &[(Decimal, Decimal)]) -> Vec<PriceSize> {
        raw.iter().map(|&(p, q)| PriceSize(p, q)).collect()
    }

    fn snapshot(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> Order<()> {
        Order {
            id: Sequence(1),
            bids: levels(bids),
            asks: levels(asks),
            is_snapshot: true,
            ts_ms: 0,
            o: (),
        }
    }

    fn delta(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> Order<()> {
        Order {
            is_snapshot: false,
            ..snapshot(bids, asks)
        }
    }
}
