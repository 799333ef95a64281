//! Collection facade over the journal store.
//!
//! Composes the codec, the record model, and the merge engine against the
//! primary table and the name index, keeping the two structures consistent:
//! every name of a stored record has exactly one index entry under its
//! sanitized, case-folded form, and every index entry resolves to a live
//! record containing that name. Mutations stage into one atomic batch,
//! either caller-supplied (`*_to_batch`) or implicit and committed before
//! returning, so the invariant can only be observed intact.

use std::collections::BTreeSet;

use rocksdb::{IteratorMode, WriteBatch};

use crate::codec;
use crate::journal::{full_match, Journal, JournalId, Query};
use crate::merge::merge_journals;
use crate::storage::db::{DbError, JournalDB, CF_JOURNALS, CF_NAME_INDEX};

/// CRUD and query operations over the stored journals.
///
/// Borrowed from [`JournalDB::journals`]; retrieved records are independent
/// copies and never alias on-disk state.
pub struct JournalList<'a> {
    db: &'a JournalDB,
}

impl<'a> JournalList<'a> {
    pub(crate) fn new(db: &'a JournalDB) -> Self {
        Self { db }
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize, DbError> {
        let cf = self.db.cf(CF_JOURNALS)?;
        let mut count = 0;
        for item in self.db.engine().iterator_cf(&cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool, DbError> {
        Ok(self.len()? == 0)
    }

    /// Iterate all records in ID order.
    pub fn iter(
        &self,
    ) -> Result<impl Iterator<Item = Result<(JournalId, Journal), DbError>> + '_, DbError> {
        let cf = self.db.cf(CF_JOURNALS)?;
        Ok(self
            .db
            .engine()
            .iterator_cf(&cf, IteratorMode::Start)
            .map(|item| -> Result<(JournalId, Journal), DbError> {
                let (key, value) = item?;
                Ok((codec::decode_id(&key)?, codec::decode_journal(&value)?))
            }))
    }

    /// Iterate the name index as (sanitized name, owning ID) pairs, in the
    /// index's string order.
    pub fn name_index(
        &self,
    ) -> Result<impl Iterator<Item = Result<(String, JournalId), DbError>> + '_, DbError> {
        let cf = self.db.cf(CF_NAME_INDEX)?;
        Ok(self
            .db
            .engine()
            .iterator_cf(&cf, IteratorMode::Start)
            .map(|item| -> Result<(String, JournalId), DbError> {
                let (key, value) = item?;
                Ok((codec::decode_str(&key)?, codec::decode_id(&value)?))
            }))
    }

    /// Point lookup. A bloom-filter probe skips the decode on definite
    /// misses; the probe may false-positive, never false-negative.
    pub fn get(&self, id: JournalId) -> Result<Option<Journal>, DbError> {
        let cf = self.db.cf(CF_JOURNALS)?;
        let key = codec::encode_id(id)?;
        if !self.db.engine().key_may_exist_cf(&cf, &key) {
            return Ok(None);
        }
        match self.db.engine().get_cf(&cf, &key)? {
            Some(bytes) => Ok(Some(codec::decode_journal(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Add a record: allocate an ID, write the record, index every name.
    pub fn add(&self, journal: &Journal) -> Result<JournalId, DbError> {
        let mut batch = WriteBatch::default();
        let id = self.add_to_batch(journal, &mut batch)?;
        self.db.commit(batch)?;
        Ok(id)
    }

    /// Stage an add into a caller-supplied batch. The ID is final once the
    /// batch commits; it is skipped (never reused) if the batch is dropped.
    pub fn add_to_batch(
        &self,
        journal: &Journal,
        batch: &mut WriteBatch,
    ) -> Result<JournalId, DbError> {
        let id = self.db.allocate_id(batch)?;
        let journals_cf = self.db.cf(CF_JOURNALS)?;
        batch.put_cf(&journals_cf, codec::encode_id(id)?, codec::encode_journal(journal)?);

        let index_cf = self.db.cf(CF_NAME_INDEX)?;
        for name in &journal.names {
            batch.put_cf(&index_cf, codec::encode_str(&sanitize_name(name))?, codec::encode_id(id)?);
        }
        log::trace!("staged add of journal {id}");
        Ok(id)
    }

    /// Remove a record and the index entry of every current name. `false`
    /// when the record does not exist.
    pub fn remove(&self, id: JournalId) -> Result<bool, DbError> {
        let mut batch = WriteBatch::default();
        if !self.remove_to_batch(id, &mut batch)? {
            return Ok(false);
        }
        self.db.commit(batch)?;
        Ok(true)
    }

    /// Stage a removal into a caller-supplied batch.
    pub fn remove_to_batch(&self, id: JournalId, batch: &mut WriteBatch) -> Result<bool, DbError> {
        let Some(journal) = self.get(id)? else {
            return Ok(false);
        };

        let journals_cf = self.db.cf(CF_JOURNALS)?;
        batch.delete_cf(&journals_cf, codec::encode_id(id)?);

        let index_cf = self.db.cf(CF_NAME_INDEX)?;
        for key in sanitized_keys(&journal.names) {
            batch.delete_cf(&index_cf, codec::encode_str(&key)?);
        }
        log::trace!("staged removal of journal {id}");
        Ok(true)
    }

    /// Overwrite a record and reconcile the index by the symmetric difference
    /// of the old and new sanitized name keys, so an ordinary edit touches
    /// only the changed entries.
    ///
    /// When `prev` is not supplied it is read from the store; that read is
    /// not isolated from concurrent writers of the same ID (see crate docs).
    pub fn update(
        &self,
        id: JournalId,
        next: &Journal,
        prev: Option<&Journal>,
    ) -> Result<(), DbError> {
        let mut batch = WriteBatch::default();
        self.update_to_batch(id, next, prev, &mut batch)?;
        self.db.commit(batch)
    }

    /// Stage an update into a caller-supplied batch.
    pub fn update_to_batch(
        &self,
        id: JournalId,
        next: &Journal,
        prev: Option<&Journal>,
        batch: &mut WriteBatch,
    ) -> Result<(), DbError> {
        let stored;
        let prev = match prev {
            Some(prev) => prev,
            None => {
                // An absent record behaves as the empty record, so a
                // half-applied earlier update heals on the next one.
                stored = self.get(id)?.unwrap_or_default();
                &stored
            }
        };

        let journals_cf = self.db.cf(CF_JOURNALS)?;
        batch.put_cf(&journals_cf, codec::encode_id(id)?, codec::encode_journal(next)?);

        let index_cf = self.db.cf(CF_NAME_INDEX)?;
        let prev_keys = sanitized_keys(&prev.names);
        let next_keys = sanitized_keys(&next.names);
        for key in prev_keys.difference(&next_keys) {
            batch.delete_cf(&index_cf, codec::encode_str(key)?);
        }
        for key in next_keys.difference(&prev_keys) {
            batch.put_cf(&index_cf, codec::encode_str(key)?, codec::encode_id(id)?);
        }
        log::trace!("staged update of journal {id}");
        Ok(())
    }

    /// Three-way merge `next` into the stored record, then update. On
    /// [`MergeConflict`](crate::MergeConflict) nothing is staged or written
    /// and the stored record is left unmodified.
    pub fn merge(
        &self,
        id: JournalId,
        next: &Journal,
        prev: Option<&Journal>,
    ) -> Result<(), DbError> {
        let mut batch = WriteBatch::default();
        self.merge_to_batch(id, next, prev, &mut batch)?;
        self.db.commit(batch)
    }

    /// Stage a merge into a caller-supplied batch.
    pub fn merge_to_batch(
        &self,
        id: JournalId,
        next: &Journal,
        prev: Option<&Journal>,
        batch: &mut WriteBatch,
    ) -> Result<(), DbError> {
        let stored;
        let prev = match prev {
            Some(prev) => prev,
            None => {
                stored = self.get(id)?.unwrap_or_default();
                &stored
            }
        };
        let merged = merge_journals(prev, next)?;
        self.update_to_batch(id, &merged, Some(prev), batch)
    }

    /// Query records by a field predicate.
    ///
    /// Exact and any-of predicates on the indexed `names` field are served
    /// from the name index; pattern predicates scan the index's sanitized
    /// keys for a full match. Every other key falls back to a linear scan of
    /// the primary table. Results are deduplicated by ID.
    pub fn query(&self, key: &str, query: &Query) -> Result<Vec<(JournalId, Journal)>, DbError> {
        if key == Journal::NAMES_KEY {
            match query {
                Query::Exact(name) => return Ok(self.lookup_name(name)?.into_iter().collect()),
                Query::AnyOf(names) => {
                    let mut seen = BTreeSet::new();
                    let mut found = Vec::new();
                    for name in names {
                        if let Some((id, journal)) = self.lookup_name(name)? {
                            if seen.insert(id) {
                                found.push((id, journal));
                            }
                        }
                    }
                    return Ok(found);
                }
                Query::Pattern(regex) => {
                    let mut seen = BTreeSet::new();
                    let mut found = Vec::new();
                    for entry in self.name_index()? {
                        let (name, id) = entry?;
                        if full_match(regex, &name) && seen.insert(id) {
                            if let Some(journal) = self.get(id)? {
                                found.push((id, journal));
                            }
                        }
                    }
                    return Ok(found);
                }
            }
        }

        let mut found = Vec::new();
        for entry in self.iter()? {
            let (id, journal) = entry?;
            if journal.matches(key, query) {
                found.push((id, journal));
            }
        }
        Ok(found)
    }

    /// First match of [`query`](Self::query), if any.
    pub fn query_one(
        &self,
        key: &str,
        query: &Query,
    ) -> Result<Option<(JournalId, Journal)>, DbError> {
        Ok(self.query(key, query)?.into_iter().next())
    }

    /// Rewrite every primary record through the current codec without
    /// changing logical content. Opaque foreign values pass through
    /// byte-identically.
    pub fn reserialize(&self) -> Result<(), DbError> {
        let cf = self.db.cf(CF_JOURNALS)?;
        for item in self.db.engine().iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            let decoded = codec::decode_value(&value)?;
            self.db.engine().put_cf(&cf, &*key, codec::encode_value(&decoded)?)?;
        }
        Ok(())
    }

    /// Drop the name index namespace.
    pub fn delete_indexes(&self) -> Result<(), DbError> {
        log::info!("dropping name index");
        self.db.engine().drop_cf(CF_NAME_INDEX)?;
        Ok(())
    }

    /// Recreate the name index by replaying every record's names through
    /// sanitization and insertion. Used for recovery and index-format
    /// changes.
    pub fn rebuild_indexes(&self) -> Result<(), DbError> {
        if self.db.engine().cf_handle(CF_NAME_INDEX).is_some() {
            self.db.engine().drop_cf(CF_NAME_INDEX)?;
        }
        self.db
            .engine()
            .create_cf(CF_NAME_INDEX, &JournalDB::name_index_cf_options())?;

        log::info!("rebuilding name index");
        let index_cf = self.db.cf(CF_NAME_INDEX)?;
        for entry in self.iter()? {
            let (id, journal) = entry?;
            for name in &journal.names {
                self.db.engine().put_cf(
                    &index_cf,
                    codec::encode_str(&sanitize_name(name))?,
                    codec::encode_id(id)?,
                )?;
            }
        }
        Ok(())
    }

    /// Resolve one display name through the index to its owning record.
    fn lookup_name(&self, name: &str) -> Result<Option<(JournalId, Journal)>, DbError> {
        let cf = self.db.cf(CF_NAME_INDEX)?;
        let key = codec::encode_str(&sanitize_name(name))?;
        match self.db.engine().get_cf(&cf, &key)? {
            Some(bytes) => {
                let id = codec::decode_id(&bytes)?;
                Ok(self.get(id)?.map(|journal| (id, journal)))
            }
            None => Ok(None),
        }
    }
}

/// Index keys derived from a set of display names.
fn sanitized_keys(names: &BTreeSet<String>) -> BTreeSet<String> {
    names.iter().map(|name| sanitize_name(name)).collect()
}

/// Canonical index form of a display name: strip one leading grammatical
/// article, retain only letters, numbers, separators, and `:`, case-fold.
///
/// Pattern queries over the index match against this form, not the raw
/// display name.
pub fn sanitize_name(name: &str) -> String {
    let stripped = strip_leading_article(name);
    let mut out = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        if c.is_alphanumeric() || c.is_whitespace() || c == ':' {
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// Definite and indefinite articles stripped from the start of a name
/// (English, French, Italian, Spanish, German).
const LEADING_ARTICLES: &[&str] = &[
    "the", "a", "le", "la", "les", "li", "gli", "el", "los", "las", "der", "die", "das",
];

/// Strip one leading article followed by whitespace, or the elided French
/// `l'` form. Mid-string articles stay untouched.
fn strip_leading_article(name: &str) -> &str {
    if let Some(prefix) = name.get(..2) {
        if prefix.eq_ignore_ascii_case("l'") {
            return &name[2..];
        }
    }
    for article in LEADING_ARTICLES {
        if let Some(prefix) = name.get(..article.len()) {
            if prefix.eq_ignore_ascii_case(article) {
                if let Some(rest) = name[article.len()..].strip_prefix(|c: char| c.is_whitespace())
                {
                    return rest;
                }
            }
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_one_leading_article_and_keeps_colon() {
        assert_eq!(
            sanitize_name("The Journal of Foo: A Study"),
            "journal of foo: a study"
        );
    }

    #[test]
    fn sanitize_handles_elided_french_article() {
        assert_eq!(sanitize_name("L'Année Biologique"), "année biologique");
    }

    #[test]
    fn sanitize_leaves_mid_string_articles() {
        assert_eq!(sanitize_name("Journal of the Foo"), "journal of the foo");
    }

    #[test]
    fn sanitize_requires_whitespace_after_article() {
        // "Acta" starts with "a" but carries no article.
        assert_eq!(sanitize_name("Acta Mathematica"), "acta mathematica");
        assert_eq!(sanitize_name("Lasers in Surgery"), "lasers in surgery");
    }

    #[test]
    fn sanitize_discards_punctuation() {
        assert_eq!(sanitize_name("J. Phys. (Paris)"), "j phys paris");
        assert_eq!(sanitize_name("Phys. Rev., Ser. 2"), "phys rev ser 2");
    }

    #[test]
    fn sanitize_case_folds_unicode() {
        assert_eq!(sanitize_name("Der ÄRZTLICHE Ratgeber"), "ärztliche ratgeber");
    }

    #[test]
    fn sanitize_strips_articles_of_each_language() {
        assert_eq!(sanitize_name("Los Alamos Science"), "alamos science");
        assert_eq!(sanitize_name("Die Naturwissenschaften"), "naturwissenschaften");
        assert_eq!(sanitize_name("La Recherche"), "recherche");
        assert_eq!(sanitize_name("Gli Archivi"), "archivi");
    }

    #[test]
    fn sanitized_keys_deduplicate_case_variants() {
        let names = BTreeSet::from([
            "The Journal of Foo".to_string(),
            "JOURNAL OF FOO".to_string(),
        ]);
        assert_eq!(sanitized_keys(&names).len(), 1);
    }
}
