//! Ordered first-match rule tables.
//!
//! Both block classification and result-text interpretation are expressed as
//! a slice of rules tried in order; the first rule that yields a value wins.
//! Precedence is therefore the slice order and nothing else.

/// One entry in a rule table.
pub trait Matcher<I: ?Sized, O> {
    fn name(&self) -> &'static str;
    fn matches(&self, input: &I) -> Option<O>;
}

/// A rule backed by a plain function.
pub struct FnRule<I: ?Sized, O> {
    pub name: &'static str,
    pub apply: fn(&I) -> Option<O>,
}

impl<I: ?Sized, O> Matcher<I, O> for FnRule<I, O> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, input: &I) -> Option<O> {
        (self.apply)(input)
    }
}

/// Evaluate `rules` in order and return the first hit with the name of the
/// rule that produced it.
pub fn first_match<I, O, M>(rules: &[M], input: &I) -> Option<(&'static str, O)>
where
    I: ?Sized,
    M: Matcher<I, O>,
{
    rules
        .iter()
        .find_map(|rule| rule.matches(input).map(|out| (rule.name(), out)))
}

/// True if `text` contains any of `needles` as a substring.
pub fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

/// True if `text` contains any of `words` with no ASCII letter, digit or
/// hyphen directly on either side, so `double` misses `doubled` and `walk`
/// misses `walk-off`.
pub fn contains_word(text: &str, words: &[&str]) -> bool {
    let joins = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric() || c == '-');
    words.iter().any(|word| {
        text.match_indices(word).any(|(at, _)| {
            !joins(text[..at].chars().next_back()) && !joins(text[at + word.len()..].chars().next())
        })
    })
}

/// True if any ASCII-alphanumeric word of `text` equals one of `tokens`.
pub fn has_token(text: &str, tokens: &[&str]) -> bool {
    if tokens.is_empty() {
        return false;
    }
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .any(|w| tokens.contains(&w))
}
