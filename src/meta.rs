//! Human readable throttling state, e.g. for response headers.

use std::collections::BTreeMap;

use crate::{
    throttler::Visitor,
    throttlers::{
        Adaptive, After, And, Before, Buffered, Chance, Each, Fixed, Keyed, Latency, Monitor, Not,
        Or, Pattern, Percentile, Priority, Ring, Running, Suppress, Timed, Wait,
    },
    Throttler,
};

/// Collects descriptive key/value pairs from a throttler tree without touching its state.
///
/// When a tree holds several policies of one kind, the one visited last wins.
#[derive(Debug, Default)]
pub struct Meta {
    entries: BTreeMap<String, String>,
}

impl Meta {
    pub fn collect(throttler: &dyn Throttler) -> BTreeMap<String, String> {
        let mut meta = Meta::default();
        throttler.accept(&mut meta);
        meta.entries
    }

    fn put(&mut self, kind: &str, field: &str, value: impl ToString) {
        self.entries
            .insert(format!("Throttler-{kind}-{field}"), value.to_string());
    }

    fn descend<'a>(&mut self, children: impl Iterator<Item = &'a dyn Throttler>) {
        for child in children {
            child.accept(self);
        }
    }
}

impl Visitor for Meta {
    fn visit_wait(&mut self, thr: &Wait) {
        self.put("Wait", "Duration", format!("{:?}", thr.duration()));
    }

    fn visit_each(&mut self, thr: &Each) {
        self.put("Each", "Current", thr.current());
        self.put("Each", "Threshold", thr.threshold());
    }

    fn visit_before(&mut self, thr: &Before) {
        self.put("Before", "Current", thr.current());
        self.put("Before", "Threshold", thr.threshold());
    }

    fn visit_after(&mut self, thr: &After) {
        self.put("After", "Current", thr.current());
        self.put("After", "Threshold", thr.threshold());
    }

    fn visit_chance(&mut self, thr: &Chance) {
        self.put("Chance", "Threshold", format!("{:.2}", thr.probability()));
    }

    fn visit_fixed(&mut self, thr: &Fixed) {
        self.put("Fixed", "Limit", thr.limit());
        self.put("Fixed", "Remaining", thr.limit().saturating_sub(thr.current()));
    }

    fn visit_running(&mut self, thr: &Running) {
        let state = thr.state();
        self.put("Running", "Limit", state.limit());
        self.put("Running", "Remaining", state.available());
    }

    fn visit_buffered(&mut self, thr: &Buffered) {
        let state = thr.state();
        self.put("Buffered", "Limit", state.limit());
        self.put("Buffered", "Remaining", state.available());
    }

    fn visit_priority(&mut self, thr: &Priority) {
        self.put("Priority", "Size", thr.size());
        self.put("Priority", "Lanes", thr.lanes());
    }

    fn visit_timed(&mut self, thr: &Timed) {
        self.put("Timed", "Limit", thr.limit());
        self.put("Timed", "Remaining", thr.remaining());
        self.put("Timed", "Window", format!("{:?}", thr.window()));
    }

    fn visit_latency(&mut self, thr: &Latency) {
        self.put("Latency", "Limit", format!("{:?}", thr.limit()));
        self.put("Latency", "Measured", format!("{:?}", thr.latency()));
    }

    fn visit_percentile(&mut self, thr: &Percentile) {
        self.put("Percentile", "Limit", format!("{:?}", thr.limit()));
        self.put("Percentile", "Measured", format!("{:?}", thr.latency()));
        self.put("Percentile", "Percentile", format!("{:.2}", thr.percentile()));
    }

    fn visit_monitor(&mut self, thr: &Monitor) {
        self.put("Monitor", "Limit", thr.limit());
    }

    fn visit_adaptive(&mut self, thr: &Adaptive) {
        self.put("Adaptive", "Step", thr.step());
        thr.timed().accept(self);
        thr.inner().accept(self);
    }

    fn visit_keyed(&mut self, thr: &Keyed) {
        self.put("Keyed", "Keys", thr.len());
        thr.for_each(|_, child| child.accept(self));
    }

    fn visit_pattern(&mut self, thr: &Pattern) {
        self.descend(thr.routes().map(|(_, child)| child));
    }

    fn visit_ring(&mut self, thr: &Ring) {
        self.descend(thr.children());
    }

    fn visit_or(&mut self, thr: &Or) {
        self.descend(thr.children());
    }

    fn visit_and(&mut self, thr: &And) {
        self.descend(thr.children());
    }

    fn visit_not(&mut self, thr: &Not) {
        thr.inner().accept(self);
    }

    fn visit_suppress(&mut self, thr: &Suppress) {
        thr.inner().accept(self);
    }
}
