//! Identifier protection: table prefixing and quoting.
//!
//! Prefixing and quoting follow these rules:
//! - an item containing `(` is an expression and passes through untouched
//! - `alias.column` where `alias` is a tracked alias is quoted but never prefixed
//! - `table.column` (and longer paths) get the prefix on the table segment
//! - a bare name is prefixed only when the caller says it names a table
//! - an existing prefix is never applied twice
//!
//! A trailing alias (`users u`, `users AS u`) is split off first and
//! reattached verbatim.

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\t ]+").expect("whitespace regex is valid"));

static AS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+AS\s+").expect("alias regex is valid"));

/// The reserved wildcard, never quoted.
const WILDCARD: &str = "*";

/// Per-connection identifier settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierRules {
    /// Table prefix, empty for none
    pub prefix: String,
    /// Prefix in caller text that is swapped for `prefix`
    pub swap_pre: String,
    /// Backend quote character, `None` to never quote
    pub escape_char: Option<char>,
    /// Default for quoting when a call does not say
    pub protect: bool,
}

impl IdentifierRules {
    /// Wraps an identifier in the quote character.
    ///
    /// Dotted paths are quoted per segment and a trailing `.*` stays bare.
    pub fn escape_identifiers(&self, item: &str) -> String {
        let Some(esc) = self.escape_char else {
            return item.to_string();
        };
        if item == WILDCARD {
            return item.to_string();
        }

        let esc_s = esc.to_string();
        let quoted = if item.contains(&format!(".{}", WILDCARD)) {
            format!("{}{}", esc, item.replace('.', &format!("{}.", esc)))
        } else if item.contains('.') {
            format!("{}{}{}", esc, item.replace('.', &format!("{}.{}", esc, esc)), esc)
        } else {
            format!("{}{}{}", esc, item, esc)
        };

        collapse_repeats(&quoted, &esc_s)
    }

    /// Prefixes and quotes one identifier.
    ///
    /// * `aliases` - aliases tracked from FROM/JOIN
    /// * `prefix_single` - a bare name is a table and takes the prefix
    /// * `escape` - quote override for this call
    /// * `field_exists` - false when a dotted item names only tables (join targets)
    pub fn protect(
        &self,
        item: &str,
        aliases: &[String],
        prefix_single: bool,
        escape: Option<bool>,
        field_exists: bool,
    ) -> String {
        let escape = escape.unwrap_or(self.protect);
        let item = WHITESPACE_RE.replace_all(item.trim(), " ").into_owned();

        let (item, alias) = match item.find(' ') {
            Some(pos) => (item[..pos].to_string(), item[pos..].to_string()),
            None => (item, String::new()),
        };

        if item.contains('(') {
            return format!("{}{}", item, alias);
        }

        if item.contains('.') {
            let mut parts: Vec<String> = item.split('.').map(|p| self.strip_quotes(p)).collect();

            if aliases.iter().any(|a| a == &parts[0]) {
                let item = if escape {
                    parts
                        .iter()
                        .map(|p| if p == WILDCARD { p.clone() } else { self.escape_identifiers(p) })
                        .collect::<Vec<_>>()
                        .join(".")
                } else {
                    parts.join(".")
                };
                return format!("{}{}", item, alias);
            }

            if !self.prefix.is_empty() {
                let mut i = match parts.len() {
                    n if n >= 4 => 2,
                    3 => 1,
                    _ => 0,
                };
                if !field_exists {
                    i += 1;
                }
                if let Some(part) = parts.get_mut(i) {
                    *part = self.apply_prefix(part);
                }
            }

            let item = parts.join(".");
            let item = if escape { self.escape_identifiers(&item) } else { item };
            return format!("{}{}", item, alias);
        }

        let mut item = self.strip_quotes(&item);
        if !self.prefix.is_empty() {
            if !self.swap_pre.is_empty() && item.starts_with(&self.swap_pre) {
                item = self.apply_prefix(&item);
            } else if prefix_single {
                item = self.apply_prefix(&item);
            }
        }

        if escape && item != WILDCARD {
            item = self.escape_identifiers(&item);
        }
        format!("{}{}", item, alias)
    }

    /// Prefix a segment, swapping `swap_pre` and never doubling `prefix`.
    fn apply_prefix(&self, part: &str) -> String {
        if !self.swap_pre.is_empty() && part.starts_with(&self.swap_pre) {
            format!("{}{}", self.prefix, &part[self.swap_pre.len()..])
        } else if part.starts_with(&self.prefix) {
            part.to_string()
        } else {
            format!("{}{}", self.prefix, part)
        }
    }

    fn strip_quotes(&self, part: &str) -> String {
        match self.escape_char {
            Some(esc) => part.replace(esc, ""),
            None => part.to_string(),
        }
    }

    /// Adds the table prefix to a bare table name.
    pub fn dbprefix(&self, table: &str) -> String {
        if self.prefix.is_empty() {
            return table.to_string();
        }
        self.apply_prefix(table)
    }
}

/// Replaces runs of `esc` with a single `esc`.
fn collapse_repeats(s: &str, esc: &str) -> String {
    let doubled = format!("{}{}", esc, esc);
    let mut out = s.to_string();
    while out.contains(&doubled) {
        out = out.replace(&doubled, esc);
    }
    out
}

/// Reads the alias a FROM/JOIN table expression introduces, if any.
///
/// `users u`, `users AS u` and `users as u` all yield `u`.
pub fn alias_of(table: &str) -> Option<String> {
    let normalized = AS_RE.replace_all(table.trim(), " ");
    let normalized = WHITESPACE_RE.replace_all(&normalized, " ");
    normalized
        .rsplit_once(' ')
        .map(|(_, alias)| alias.to_string())
        .filter(|alias| !alias.is_empty())
}

/// All aliases introduced by a comma-separated table list.
pub fn aliases_of(tables: &str) -> Vec<String> {
    tables.split(',').filter_map(alias_of).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(prefix: &str) -> IdentifierRules {
        IdentifierRules {
            prefix: prefix.to_string(),
            swap_pre: String::new(),
            escape_char: Some('`'),
            protect: true,
        }
    }

    fn protect(r: &IdentifierRules, item: &str) -> String {
        r.protect(item, &[], false, None, true)
    }

    #[test]
    fn test_escape_identifiers() {
        let r = rules("");
        assert_eq!(r.escape_identifiers("name"), "`name`");
        assert_eq!(r.escape_identifiers("users.name"), "`users`.`name`");
        assert_eq!(r.escape_identifiers("users.*"), "`users`.*");
        assert_eq!(r.escape_identifiers("*"), "*");
        assert_eq!(r.escape_identifiers("`name`"), "`name`");
    }

    #[test]
    fn test_protect_plain_column() {
        let r = rules("app_");
        assert_eq!(protect(&r, "name"), "`name`");
        assert_eq!(r.protect("users", &[], true, None, true), "`app_users`");
    }

    #[test]
    fn test_protect_dotted_adds_prefix_to_table_segment() {
        let r = rules("app_");
        assert_eq!(protect(&r, "users.name"), "`app_users`.`name`");
        assert_eq!(protect(&r, "main.users.name"), "`main`.`app_users`.`name`");
        assert_eq!(protect(&r, "srv.main.users.name"), "`srv`.`main`.`app_users`.`name`");
    }

    #[test]
    fn test_protect_without_field_shifts_right() {
        let r = rules("app_");
        assert_eq!(r.protect("main.users", &[], false, None, false), "`main`.`app_users`");
    }

    #[test]
    fn test_protect_tracked_alias_skips_prefix() {
        let r = rules("app_");
        let aliases = vec!["u".to_string()];
        assert_eq!(r.protect("u.name", &aliases, false, None, true), "`u`.`name`");
        assert_eq!(r.protect("u.*", &aliases, false, None, true), "`u`.*");
    }

    #[test]
    fn test_protect_expression_passes_through() {
        let r = rules("app_");
        assert_eq!(protect(&r, "COUNT(users.id) AS total"), "COUNT(users.id) AS total");
    }

    #[test]
    fn test_protect_keeps_alias_verbatim() {
        let r = rules("app_");
        assert_eq!(r.protect("users  AS   u", &[], true, None, true), "`app_users` AS u");
        assert_eq!(r.protect("users u", &[], true, None, true), "`app_users` u");
    }

    #[test]
    fn test_protect_is_idempotent() {
        let r = rules("app_");
        for item in ["app_users", "users", "app_users.name", "users.name"] {
            let once = r.protect(item, &[], true, None, true);
            let twice = r.protect(&once, &[], true, None, true);
            assert_eq!(once, twice, "{}", item);
        }
    }

    #[test]
    fn test_protect_swap_prefix() {
        let mut r = rules("app_");
        r.swap_pre = "tbl_".to_string();
        assert_eq!(r.protect("tbl_users", &[], true, None, true), "`app_users`");
        assert_eq!(protect(&r, "tbl_users.id"), "`app_users`.`id`");
    }

    #[test]
    fn test_protect_escape_override() {
        let r = rules("app_");
        assert_eq!(r.protect("users", &[], true, Some(false), true), "app_users");
        assert_eq!(r.protect("*", &[], false, None, true), "*");
    }

    #[test]
    fn test_alias_of() {
        assert_eq!(alias_of("users u").as_deref(), Some("u"));
        assert_eq!(alias_of("users AS u").as_deref(), Some("u"));
        assert_eq!(alias_of("users as  u").as_deref(), Some("u"));
        assert_eq!(alias_of("users"), None);
        assert_eq!(aliases_of("users u, posts AS p, tags"), vec!["u", "p"]);
    }
}
