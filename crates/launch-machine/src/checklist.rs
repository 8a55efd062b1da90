use mission_protocol::{GoPollRole, PreFillItem, RangePermitEntry};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Toggle {
    No,
    Yes,
}

impl Toggle {
    pub fn flipped(self) -> Self {
        match self {
            Toggle::No => Toggle::Yes,
            Toggle::Yes => Toggle::No,
        }
    }

    pub fn is_yes(self) -> bool {
        self == Toggle::Yes
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Toggle::No => "no",
            Toggle::Yes => "yes",
        }
    }
}

pub trait ChecklistItem: Copy + Eq + std::fmt::Debug + 'static {
    const ALL: &'static [Self];

    fn name(self) -> &'static str;
}

impl ChecklistItem for PreFillItem {
    const ALL: &'static [Self] = &PreFillItem::ALL;

    fn name(self) -> &'static str {
        self.as_str()
    }
}

impl ChecklistItem for GoPollRole {
    const ALL: &'static [Self] = &GoPollRole::ALL;

    fn name(self) -> &'static str {
        self.as_str()
    }
}

impl ChecklistItem for RangePermitEntry {
    const ALL: &'static [Self] = &RangePermitEntry::ALL;

    fn name(self) -> &'static str {
        self.as_str()
    }
}

/// A set of independent no/yes regions, one per item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checklist<T: ChecklistItem> {
    entries: Vec<Toggle>,
    _items: PhantomData<T>,
}

impl<T: ChecklistItem> Checklist<T> {
    pub fn new() -> Self {
        Self {
            entries: vec![Toggle::No; T::ALL.len()],
            _items: PhantomData,
        }
    }

    pub fn get(&self, item: T) -> Toggle {
        position(item)
            .and_then(|index| self.entries.get(index).copied())
            .unwrap_or(Toggle::No)
    }

    pub fn toggle(&mut self, item: T) {
        if let Some(entry) = position(item).and_then(|index| self.entries.get_mut(index)) {
            *entry = entry.flipped();
        }
    }

    pub fn complete(&self) -> bool {
        self.entries.iter().all(|entry| entry.is_yes())
    }

    pub fn iter(&self) -> impl Iterator<Item = (T, Toggle)> + '_ {
        T::ALL.iter().copied().zip(self.entries.iter().copied())
    }
}

impl<T: ChecklistItem> Default for Checklist<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ChecklistItem> Serialize for Checklist<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (item, toggle) in self.iter() {
            map.serialize_entry(item.name(), &toggle)?;
        }
        map.end()
    }
}

fn position<T: ChecklistItem>(item: T) -> Option<usize> {
    T::ALL.iter().position(|candidate| *candidate == item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_are_independent() {
        let mut checklist = Checklist::<GoPollRole>::new();
        checklist.toggle(GoPollRole::Propulsion);
        assert_eq!(checklist.get(GoPollRole::Propulsion), Toggle::Yes);
        assert_eq!(checklist.get(GoPollRole::Avionics), Toggle::No);

        checklist.toggle(GoPollRole::Propulsion);
        assert_eq!(checklist.get(GoPollRole::Propulsion), Toggle::No);
    }

    #[test]
    fn complete_requires_every_item() {
        let mut checklist = Checklist::<RangePermitEntry>::new();
        for entry in RangePermitEntry::ALL {
            assert!(!checklist.complete());
            checklist.toggle(entry);
        }
        assert!(checklist.complete());
    }

    #[test]
    fn serializes_as_named_map() {
        let mut checklist = Checklist::<RangePermitEntry>::new();
        checklist.toggle(RangePermitEntry::RangeCleared);
        let value = serde_json::to_value(&checklist).expect("serialize");
        assert_eq!(value["range_cleared"], "yes");
        assert_eq!(value["airspace_cleared"], "no");
    }
}
