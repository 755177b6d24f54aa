// Copyright 2024 The SnowFS Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `.snowignore` pattern compilation and classification.
//!
//! One pattern per line. `!` negates, a leading `/` anchors to the repo
//! root, and every pattern implicitly matches the named entry plus
//! everything beneath it (trailing `/**`, `/*` and `/` are normalised away
//! and re-applied as an optional-descendants suffix). Supported glob
//! features: `*`, `?`, `[…]` classes, the extglobs `?() +() *() @() !()`,
//! and `**`. Brace expansion is deliberately absent, wildcards never match a
//! leading dot unless the pattern spells one, and matching is
//! case-sensitive over forward-slash paths. The last matching pattern
//! decides.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use tracing::warn;

use crate::file_util::PathError;

/// Built-in defaults: temp/backup/cache artefacts of common DCC tools.
pub const DEFAULT_PATTERNS: &[&str] = &[
    "thumbs.db",
    "*.bkp",
    "bkp/**",
    "*_bak[0-9]*.[A-Za-z0-9]+",
    "*.tmp",
    "tmp/**",
    "temp/**",
    "cache/**",
    "*.lnk",
    "[Dd]esktop.ini",
    "Backup_of*",
    "Adobe Premiere Pro Auto-Save/**",
    "Adobe After Effects Auto-Save/**",
    "tmpAEtoAMEProject-*.aep",
    "RECOVER_*",
    "temp.noindex/**",
    "~*",
    "*.blend+([0-9])",
    "*.bak*([0-9])",
    "backup/**",
    "*.3dm.rhl",
    "*.3dmbak",
];

/// The file name patterns are read from, relative to the workdir root.
pub const IGNORE_FILE_NAME: &str = ".snowignore";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GroupOp {
    ZeroOrOne,
    OneOrMore,
    ZeroOrMore,
    Exactly,
    Not,
}

#[derive(Clone, Debug)]
enum Token {
    Literal(char),
    AnyChar,
    Star,
    Class {
        negated: bool,
        ranges: Vec<(char, char)>,
    },
    Group {
        op: GroupOp,
        branches: Vec<Vec<Token>>,
    },
}

#[derive(Clone, Debug)]
enum SegmentPattern {
    /// A `**` segment: any run of path segments, including none.
    AnyDepth,
    Tokens {
        tokens: Vec<Token>,
        leading_wildcard: bool,
    },
}

#[derive(Clone, Debug)]
struct IgnoreRule {
    negated: bool,
    anchored: bool,
    segments: Vec<SegmentPattern>,
}

struct SegmentParser {
    chars: Vec<char>,
    pos: usize,
}

impl SegmentParser {
    fn new(segment: &str) -> Self {
        Self {
            chars: segment.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn group_op(c: char) -> Option<GroupOp> {
        match c {
            '?' => Some(GroupOp::ZeroOrOne),
            '+' => Some(GroupOp::OneOrMore),
            '*' => Some(GroupOp::ZeroOrMore),
            '@' => Some(GroupOp::Exactly),
            '!' => Some(GroupOp::Not),
            _ => None,
        }
    }

    /// Parses tokens until `)` or `|` at this nesting level, or end of input.
    fn parse_tokens(&mut self, inside_group: bool) -> Result<Vec<Token>, String> {
        let mut tokens: Vec<Token> = Vec::new();
        while let Some(c) = self.peek() {
            if inside_group && (c == ')' || c == '|') {
                break;
            }
            self.pos += 1;
            match c {
                '\\' => {
                    let escaped = self.bump().ok_or("dangling escape")?;
                    tokens.push(Token::Literal(escaped));
                }
                c if Self::group_op(c).is_some() && self.peek() == Some('(') => {
                    self.pos += 1;
                    let branches = self.parse_branches()?;
                    tokens.push(Token::Group {
                        op: Self::group_op(c).unwrap(),
                        branches,
                    });
                }
                '*' => tokens.push(Token::Star),
                '?' => tokens.push(Token::AnyChar),
                '[' => tokens.push(self.parse_class()?),
                '+' => {
                    // Bare `+` quantifies the preceding token, regex style.
                    match tokens.pop() {
                        Some(previous) => tokens.push(Token::Group {
                            op: GroupOp::OneOrMore,
                            branches: vec![vec![previous]],
                        }),
                        None => tokens.push(Token::Literal('+')),
                    }
                }
                other => tokens.push(Token::Literal(other)),
            }
        }
        Ok(tokens)
    }

    fn parse_branches(&mut self) -> Result<Vec<Vec<Token>>, String> {
        let mut branches = Vec::new();
        loop {
            branches.push(self.parse_tokens(true)?);
            match self.bump() {
                Some('|') => {}
                Some(')') => return Ok(branches),
                _ => return Err("unterminated group".to_string()),
            }
        }
    }

    fn parse_class(&mut self) -> Result<Token, String> {
        let negated = matches!(self.peek(), Some('!') | Some('^'));
        if negated {
            self.pos += 1;
        }
        let mut ranges: Vec<(char, char)> = Vec::new();
        loop {
            let c = self.bump().ok_or("unterminated character class")?;
            match c {
                ']' if !ranges.is_empty() => return Ok(Token::Class { negated, ranges }),
                '\\' => {
                    let escaped = self.bump().ok_or("dangling escape in class")?;
                    ranges.push((escaped, escaped));
                }
                c => {
                    if self.peek() == Some('-') && self.peek_next().is_some_and(|n| n != ']') {
                        self.pos += 1;
                        let end = self.bump().unwrap();
                        ranges.push((c, end));
                    } else {
                        ranges.push((c, c));
                    }
                }
            }
        }
    }
}

fn parse_segment(segment: &str) -> Result<SegmentPattern, String> {
    if segment == "**" {
        return Ok(SegmentPattern::AnyDepth);
    }
    let mut parser = SegmentParser::new(segment);
    let tokens = parser.parse_tokens(false)?;
    let leading_wildcard = matches!(
        tokens.first(),
        Some(Token::Star | Token::AnyChar | Token::Class { .. } | Token::Group { .. })
    );
    Ok(SegmentPattern::Tokens {
        tokens,
        leading_wildcard,
    })
}

/// Strips `/*…*/` block comments (a `/*` immediately followed by another `*`
/// is glob syntax, not a comment), then `//…` and `#…` line comments.
fn strip_comments(line: &str) -> String {
    let mut out = line.to_string();
    loop {
        let Some(start) = out
            .match_indices("/*")
            .find(|(idx, _)| out[idx + 2..].chars().next() != Some('*'))
            .map(|(idx, _)| idx)
        else {
            break;
        };
        match out[start + 2..].find("*/") {
            Some(end) => out.replace_range(start..start + 2 + end + 2, ""),
            None => break,
        }
    }
    if let Some(idx) = out.find("//") {
        out.truncate(idx);
    }
    if let Some(idx) = out.find('#') {
        out.truncate(idx);
    }
    out.trim().to_string()
}

impl IgnoreRule {
    fn parse(line: &str) -> Result<Option<IgnoreRule>, String> {
        let mut pattern = strip_comments(line);
        if pattern.is_empty() {
            return Ok(None);
        }
        let negated = pattern.starts_with('!');
        if negated {
            pattern.remove(0);
        }
        let anchored = pattern.starts_with('/');
        if anchored {
            pattern.remove(0);
        }
        // Directory suffixes collapse: the rule matches the entry itself and,
        // through the implicit descendants suffix, everything beneath it.
        loop {
            if let Some(stripped) = pattern.strip_suffix("/**") {
                pattern = stripped.to_string();
            } else if let Some(stripped) = pattern.strip_suffix("/*") {
                pattern = stripped.to_string();
            } else if let Some(stripped) = pattern.strip_suffix('/') {
                pattern = stripped.to_string();
            } else {
                break;
            }
        }
        if pattern.is_empty() {
            return Ok(None);
        }
        let segments = pattern
            .split('/')
            .map(parse_segment)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(IgnoreRule {
            negated,
            anchored,
            segments,
        }))
    }

    fn matches(&self, rel_path: &str) -> bool {
        let segments: Vec<&str> = rel_path.split('/').filter(|s| !s.is_empty()).collect();
        if self.anchored {
            match_from(&self.segments, &segments)
        } else {
            (0..segments.len()).any(|start| match_from(&self.segments, &segments[start..]))
        }
    }
}

fn match_from(patterns: &[SegmentPattern], segments: &[&str]) -> bool {
    let Some((first, rest)) = patterns.split_first() else {
        // All pattern segments consumed; leftover path segments are the
        // entry's descendants and match implicitly.
        return true;
    };
    match first {
        SegmentPattern::AnyDepth => {
            (0..=segments.len()).any(|skip| match_from(rest, &segments[skip..]))
        }
        SegmentPattern::Tokens {
            tokens,
            leading_wildcard,
        } => {
            let Some((segment, remaining)) = segments.split_first() else {
                return false;
            };
            if *leading_wildcard && segment.starts_with('.') {
                return false;
            }
            let chars: Vec<char> = segment.chars().collect();
            match_tokens(tokens, &chars) && match_from(rest, remaining)
        }
    }
}

fn class_matches(negated: bool, ranges: &[(char, char)], c: char) -> bool {
    let inside = ranges.iter().any(|&(lo, hi)| c >= lo && c <= hi);
    inside != negated
}

fn any_branch_matches(branches: &[Vec<Token>], chars: &[char]) -> bool {
    branches.iter().any(|branch| match_tokens(branch, chars))
}

fn match_one_or_more(branches: &[Vec<Token>], rest: &[Token], chars: &[char]) -> bool {
    for split in 1..=chars.len() {
        if any_branch_matches(branches, &chars[..split])
            && (match_tokens(rest, &chars[split..])
                || match_one_or_more(branches, rest, &chars[split..]))
        {
            return true;
        }
    }
    false
}

fn match_tokens(tokens: &[Token], chars: &[char]) -> bool {
    let Some((token, rest)) = tokens.split_first() else {
        return chars.is_empty();
    };
    match token {
        Token::Literal(expected) => {
            chars.first() == Some(expected) && match_tokens(rest, &chars[1..])
        }
        Token::AnyChar => !chars.is_empty() && match_tokens(rest, &chars[1..]),
        Token::Star => (0..=chars.len()).any(|skip| match_tokens(rest, &chars[skip..])),
        Token::Class { negated, ranges } => chars
            .first()
            .is_some_and(|&c| class_matches(*negated, ranges, c))
            && match_tokens(rest, &chars[1..]),
        Token::Group { op, branches } => match op {
            GroupOp::Exactly => (0..=chars.len()).any(|split| {
                any_branch_matches(branches, &chars[..split]) && match_tokens(rest, &chars[split..])
            }),
            GroupOp::ZeroOrOne => {
                match_tokens(rest, chars)
                    || (1..=chars.len()).any(|split| {
                        any_branch_matches(branches, &chars[..split])
                            && match_tokens(rest, &chars[split..])
                    })
            }
            GroupOp::ZeroOrMore => {
                match_tokens(rest, chars) || match_one_or_more(branches, rest, chars)
            }
            GroupOp::OneOrMore => match_one_or_more(branches, rest, chars),
            GroupOp::Not => (0..=chars.len()).any(|split| {
                !any_branch_matches(branches, &chars[..split]) && match_tokens(rest, &chars[split..])
            }),
        },
    }
}

/// A compiled pattern set. Patterns apply in order; the last match decides.
#[derive(Clone, Debug, Default)]
pub struct IgnoreMatcher {
    rules: Vec<IgnoreRule>,
}

impl IgnoreMatcher {
    /// Compiles patterns in order. Unparseable lines are skipped with a
    /// warning rather than poisoning the whole set.
    pub fn from_patterns<I>(patterns: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut rules = Vec::new();
        for pattern in patterns {
            match IgnoreRule::parse(pattern.as_ref()) {
                Ok(Some(rule)) => rules.push(rule),
                Ok(None) => {}
                Err(message) => {
                    warn!(pattern = pattern.as_ref(), %message, "skipping ignore pattern");
                }
            }
        }
        Self { rules }
    }

    /// Reads `.snowignore` under `workdir` (when present) and prepends the
    /// built-in defaults unless `nodefaultignore` is set.
    pub fn load(workdir: &Path, nodefaultignore: bool) -> Result<Self, PathError> {
        let mut patterns: Vec<String> = Vec::new();
        if !nodefaultignore {
            patterns.extend(DEFAULT_PATTERNS.iter().map(|p| p.to_string()));
        }
        let ignore_file = workdir.join(IGNORE_FILE_NAME);
        match fs::read_to_string(&ignore_file) {
            Ok(contents) => patterns.extend(contents.lines().map(|l| l.to_string())),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(PathError {
                    path: ignore_file,
                    error,
                });
            }
        }
        Ok(Self::from_patterns(patterns))
    }

    pub fn is_ignored(&self, rel_path: &str) -> bool {
        let mut decision = false;
        for rule in &self.rules {
            if rule.matches(rel_path) {
                decision = !rule.negated;
            }
        }
        decision
    }

    /// Returns the subset of `rel_paths` the pattern set ignores.
    pub fn classify<'a, I>(&self, rel_paths: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        rel_paths
            .into_iter()
            .filter(|path| self.is_ignored(path))
            .map(|path| path.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use maplit::hashset;

    use super::*;

    fn matcher(patterns: &[&str]) -> IgnoreMatcher {
        IgnoreMatcher::from_patterns(patterns.iter().copied())
    }

    #[test]
    fn negation_inverts_last_decision() {
        let matcher = matcher(&["subdir", "!subdir/file5.txt"]);
        let paths = [
            "file1.txt",
            "file2.txt",
            "file3.txt",
            "file4.txt",
            "file5.txt",
            "subdir",
            "subdir/file1.txt",
            "subdir/file2.txt",
            "subdir/file3.txt",
            "subdir/file4.txt",
            "subdir/file5.txt",
        ];
        let ignored = matcher.classify(paths.iter().copied());
        assert_eq!(
            ignored,
            hashset! {
                "subdir".to_string(),
                "subdir/file1.txt".to_string(),
                "subdir/file2.txt".to_string(),
                "subdir/file3.txt".to_string(),
                "subdir/file4.txt".to_string(),
            }
        );
    }

    #[test]
    fn patterns_match_at_any_depth_unless_anchored() {
        let any_depth = matcher(&["cache/**"]);
        assert!(any_depth.is_ignored("cache/a.bin"));
        assert!(any_depth.is_ignored("deep/cache/a.bin"));

        let anchored = matcher(&["/cache"]);
        assert!(anchored.is_ignored("cache/a.bin"));
        assert!(!anchored.is_ignored("deep/cache/a.bin"));
    }

    #[test]
    fn directory_suffixes_match_the_directory_itself() {
        for pattern in ["bkp/**", "bkp/*", "bkp/"] {
            let m = matcher(&[pattern]);
            assert!(m.is_ignored("bkp"), "pattern {pattern}");
            assert!(m.is_ignored("bkp/inner/file"), "pattern {pattern}");
        }
    }

    #[test]
    fn comments_and_blanks_are_stripped() {
        let m = matcher(&[
            "",
            "   ",
            "# full line comment",
            "// another",
            "*.tmp # trailing",
            "*.bkp /* inline */",
        ]);
        assert!(m.is_ignored("scratch.tmp"));
        assert!(m.is_ignored("scene.bkp"));
        assert!(!m.is_ignored("scene.psd"));
    }

    #[test]
    fn wildcards_do_not_match_dotfiles() {
        let m = matcher(&["*.tmp"]);
        assert!(m.is_ignored("a.tmp"));
        assert!(!m.is_ignored(".hidden.tmp"));
        let explicit = matcher(&[".*.tmp"]);
        assert!(explicit.is_ignored(".hidden.tmp"));
    }

    #[test]
    fn character_classes_and_quantifier() {
        let m = matcher(&["*_bak[0-9]*.[A-Za-z0-9]+"]);
        assert!(m.is_ignored("scene_bak1.psd"));
        assert!(m.is_ignored("scene_bak12.blend42"));
        assert!(!m.is_ignored("scene_bakX.psd"));
        assert!(!m.is_ignored("scene_bak1.---"));
    }

    #[test]
    fn extglobs() {
        let blend = matcher(&["*.blend+([0-9])"]);
        assert!(blend.is_ignored("scene.blend1"));
        assert!(blend.is_ignored("scene.blend123"));
        assert!(!blend.is_ignored("scene.blend"));

        let bak = matcher(&["*.bak*([0-9])"]);
        assert!(bak.is_ignored("scene.bak"));
        assert!(bak.is_ignored("scene.bak7"));
        assert!(!bak.is_ignored("scene.bakx"));

        let not = matcher(&["!(keep).tmp"]);
        assert!(not.is_ignored("drop.tmp"));
        assert!(!not.is_ignored("keep.tmp"));
    }

    #[test]
    fn braces_are_not_expanded() {
        let m = matcher(&["v{1,2}.bin"]);
        assert!(!m.is_ignored("v1.bin"));
        assert!(m.is_ignored("v{1,2}.bin"));
    }

    #[test]
    fn default_set_covers_dcc_artefacts() {
        let m = IgnoreMatcher::from_patterns(DEFAULT_PATTERNS.iter().copied());
        for ignored in [
            "thumbs.db",
            "scene.bkp",
            "bkp/old.psd",
            "scratch.tmp",
            "tmp/a",
            "temp/b",
            "cache/tex.bin",
            "shortcut.lnk",
            "Desktop.ini",
            "desktop.ini",
            "Backup_of_scene.cdr",
            "Adobe Premiere Pro Auto-Save/p.prproj",
            "tmpAEtoAMEProject-1.aep",
            "RECOVER_scene.max",
            "temp.noindex/x",
            "~lock.psd",
            "scene.blend1",
            "model.bak",
            "model.bak2",
            "backup/scene.ma",
            "part.3dm.rhl",
            "part.3dmbak",
        ] {
            assert!(m.is_ignored(ignored), "{ignored} should be ignored");
        }
        for kept in ["scene.psd", "render.exr", "model.blend", "notes.txt"] {
            assert!(!m.is_ignored(kept), "{kept} should not be ignored");
        }
    }
}
