//! In-process wallclock scheduling: a five-field crontab and a min-heap
//! interval timer, both dispatched by the caller (typically the `worker`
//! CLI subcommand, run alongside the pop loop).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::hash::Hash;

use chrono::{Local, TimeZone};

/// A single crontab field's value.
#[derive(Debug, Clone)]
pub enum Field {
    /// Match only this point.
    Point(u32),
    /// Match every `k`-th unit starting at the field's minimum — the
    /// range-step form of a negative field value.
    Step(u32),
    /// Match exactly these points.
    Set(Vec<u32>),
}

impl Default for Field {
    /// Matches every value in range — the original's `-1` default.
    fn default() -> Self {
        Field::Step(1)
    }
}

fn points(field: &Field, min: u32, max: u32) -> Vec<u32> {
    match field {
        Field::Point(p) => vec![*p],
        Field::Step(k) => (min..=max).step_by((*k).max(1) as usize).collect(),
        Field::Set(pts) => pts.clone(),
    }
}

fn update_set<A: Eq + Hash + Clone>(map: &mut HashMap<u32, HashSet<A>>, action: &A, pts: &[u32]) {
    for p in pts {
        map.entry(*p).or_default().insert(action.clone());
    }
}

/// Five independent field -> action-set mappings (minute, hour, day,
/// month, weekday); a due timestamp's action set is the intersection of
/// all five at that timestamp's field values.
#[derive(Debug, Default)]
pub struct Crontab<A: Eq + Hash + Clone> {
    minutes: HashMap<u32, HashSet<A>>,
    hours: HashMap<u32, HashSet<A>>,
    days: HashMap<u32, HashSet<A>>,
    months: HashMap<u32, HashSet<A>>,
    wdays: HashMap<u32, HashSet<A>>,
}

impl<A: Eq + Hash + Clone> Crontab<A> {
    pub fn new() -> Self {
        Self {
            minutes: HashMap::new(),
            hours: HashMap::new(),
            days: HashMap::new(),
            months: HashMap::new(),
            wdays: HashMap::new(),
        }
    }

    /// Register `action` to fire whenever all five fields match. Fields
    /// default to "every unit" when omitted.
    pub fn add(
        &mut self,
        action: A,
        minute: Field,
        hour: Field,
        day: Field,
        month: Field,
        wday: Field,
    ) {
        update_set(&mut self.minutes, &action, &points(&minute, 0, 59));
        update_set(&mut self.hours, &action, &points(&hour, 0, 23));
        update_set(&mut self.days, &action, &points(&day, 1, 31));
        update_set(&mut self.months, &action, &points(&month, 1, 12));
        let wpoints: Vec<u32> = points(&wday, 1, 7)
            .into_iter()
            .map(|w| if w == 0 { 7 } else { w })
            .collect();
        update_set(&mut self.wdays, &action, &wpoints);
    }

    /// Actions due at the given field values, as the intersection of all
    /// five field lookups.
    pub fn actions(&self, minute: u32, hour: u32, day: u32, month: u32, wday: u32) -> HashSet<A> {
        let empty = HashSet::new();
        let sets = [
            self.minutes.get(&minute).unwrap_or(&empty),
            self.hours.get(&hour).unwrap_or(&empty),
            self.days.get(&day).unwrap_or(&empty),
            self.months.get(&month).unwrap_or(&empty),
            self.wdays.get(&wday).unwrap_or(&empty),
        ];
        let mut result: HashSet<A> = sets[0].iter().cloned().collect();
        for set in &sets[1..] {
            result.retain(|a| set.contains(a));
        }
        result
    }

    /// Decompose `ts` (unix seconds) into local wallclock fields and look
    /// up [`Self::actions`].
    pub fn actions_ts(&self, ts: i64) -> HashSet<A> {
        use chrono::Datelike;
        use chrono::Timelike;
        let dt = Local.timestamp_opt(ts, 0).single().expect("valid timestamp");
        self.actions(
            dt.minute(),
            dt.hour(),
            dt.day(),
            dt.month(),
            dt.weekday().number_from_monday(),
        )
    }
}

#[derive(Debug, Clone)]
struct Event<A> {
    next_fire: i64,
    interval: i64,
    action: A,
}

impl<A> PartialEq for Event<A> {
    fn eq(&self, other: &Self) -> bool {
        (self.next_fire, self.interval) == (other.next_fire, other.interval)
    }
}
impl<A> Eq for Event<A> {}
impl<A> PartialOrd for Event<A> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<A> Ord for Event<A> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.next_fire, self.interval).cmp(&(other.next_fire, other.interval))
    }
}

/// A min-heap of recurring `(next_fire, interval, action)` entries.
/// Iterating yields `(next_fire, action)` due-in-order and re-inserts each
/// entry with `next_fire += interval`, forever.
pub struct Timer<A> {
    heap: BinaryHeap<Reverse<Event<A>>>,
}

impl<A> Default for Timer<A> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }
}

impl<A> Timer<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, action: A, at: i64, interval: i64) {
        self.heap.push(Reverse(Event {
            next_fire: at,
            interval,
            action,
        }));
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<A: Clone> Iterator for Timer<A> {
    type Item = (i64, A);

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse(event) = self.heap.pop()?;
        let next_fire = event.next_fire;
        let action = event.action.clone();
        self.heap.push(Reverse(Event {
            next_fire: event.next_fire + event.interval,
            interval: event.interval,
            action: event.action,
        }));
        Some((next_fire, action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_timer_fires_in_order() {
        let mut t: Timer<&'static str> = Timer::new();
        t.add("foo", 10, 10);
        t.add("boo", 20, 20);
        t.add("bar", 30, 30);

        let result: Vec<_> = t.take(11).collect();
        assert_eq!(
            result,
            vec![
                (10, "foo"),
                (20, "foo"),
                (20, "boo"),
                (30, "foo"),
                (30, "bar"),
                (40, "foo"),
                (40, "boo"),
                (50, "foo"),
                (60, "foo"),
                (60, "boo"),
                (60, "bar"),
            ]
        );
    }

    #[test]
    fn empty_timer_yields_nothing() {
        let mut t: Timer<&'static str> = Timer::new();
        assert_eq!(t.next(), None);
    }

    #[test]
    fn crontab_intersects_fields() {
        let mut c: Crontab<&'static str> = Crontab::new();
        c.add(
            "boo",
            Field::default(),
            Field::default(),
            Field::default(),
            Field::default(),
            Field::default(),
        );
        c.add(
            "foo",
            Field::Point(0),
            Field::default(),
            Field::default(),
            Field::default(),
            Field::default(),
        );
        c.add(
            "bar",
            Field::Set(vec![1, 3]),
            Field::Step(5),
            Field::Step(1),
            Field::Step(1),
            Field::Point(0),
        );

        assert_eq!(c.actions(0, 1, 1, 1, 1), set(["boo", "foo"]));
        assert_eq!(c.actions(1, 1, 1, 1, 1), set(["boo"]));
        assert_eq!(c.actions(1, 5, 1, 1, 7), set(["boo", "bar"]));
        assert_eq!(c.actions(3, 5, 1, 1, 7), set(["boo", "bar"]));
    }

    fn set<const N: usize>(items: [&'static str; N]) -> HashSet<&'static str> {
        items.into_iter().collect()
    }
}
