/*
 *  tagscan.rs
 *
 *  GeoWx - weather and time on a serial display
 *	(c) 2020-26 Stuart Hunter
 *
 *  Line oriented start/end marker scanner and the rule tables
 *  the response machines are built from
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */

/// A start/end marker pair, `<name>` / `</name>`.
///
/// Markers are assembled at compile time by the [`tag!`] macro so scanning a
/// line never allocates. Matching is on the full marker, so `temp_c` never
/// matches a `<temp_f>` line and `forecastday` never matches `<forecastdays>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    name: &'static str,
    open: &'static str,
    close: &'static str,
}

/// Build a [`Tag`] from a string literal.
macro_rules! tag {
    ($name:literal) => {
        $crate::tagscan::Tag::from_markers($name, concat!("<", $name, ">"), concat!("</", $name, ">"))
    };
}
pub(crate) use tag;

impl Tag {
    #[doc(hidden)]
    pub const fn from_markers(name: &'static str, open: &'static str, close: &'static str) -> Self {
        Self { name, open, close }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True when the line holds this tag's start marker.
    pub fn opens(&self, line: &str) -> bool {
        line.contains(self.open)
    }

    /// True when the line holds this tag's end marker.
    pub fn closes(&self, line: &str) -> bool {
        line.contains(self.close)
    }

    /// Inner text of a leaf tag.
    ///
    /// Values must sit on the same line as their start marker; when the end
    /// marker is not on this line the value is reported as missing rather
    /// than joined with whatever follows.
    pub fn extract<'a>(&self, line: &'a str) -> Option<&'a str> {
        let start = line.find(self.open)? + self.open.len();
        let rest = &line[start..];
        let end = rest.find(self.close)?;
        Some(&rest[..end])
    }
}

/// What a matching tag does to a response machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S, F> {
    /// Start marker moves into a child state.
    Descend(S),
    /// Start marker carries a scalar value for a field.
    Leaf(F),
    /// End marker of the current section returns to the parent state.
    Ascend(S),
}

/// One row of a state's transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule<S, F> {
    pub tag: Tag,
    pub transition: Transition<S, F>,
}

impl<S, F> Rule<S, F> {
    pub const fn descend(tag: Tag, to: S) -> Self {
        Self { tag, transition: Transition::Descend(to) }
    }

    pub const fn leaf(tag: Tag, field: F) -> Self {
        Self { tag, transition: Transition::Leaf(field) }
    }

    pub const fn ascend(tag: Tag, to: S) -> Self {
        Self { tag, transition: Transition::Ascend(to) }
    }
}

/// Outcome of scanning one line against a state's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a, S, F> {
    Enter(S),
    /// A leaf start marker was seen; `None` when its value was not on the line.
    Value(F, Option<&'a str>),
    Leave(S),
}

/// Scan a line against one state's rules.
///
/// Descend rules are tried first, then leaf rules, then the end marker, each
/// group in table order, so a line triggers at most one transition.
pub fn scan<'a, S: Copy, F: Copy>(rules: &[Rule<S, F>], line: &'a str) -> Option<Event<'a, S, F>> {
    let descend = rules.iter().find_map(|rule| match rule.transition {
        Transition::Descend(to) if rule.tag.opens(line) => Some(Event::Enter(to)),
        _ => None,
    });
    if descend.is_some() {
        return descend;
    }

    let leaf = rules.iter().find_map(|rule| match rule.transition {
        Transition::Leaf(field) if rule.tag.opens(line) => Some(Event::Value(field, rule.tag.extract(line))),
        _ => None,
    });
    if leaf.is_some() {
        return leaf;
    }

    rules.iter().find_map(|rule| match rule.transition {
        Transition::Ascend(to) if rule.tag.closes(line) => Some(Event::Leave(to)),
        _ => None,
    })
}
