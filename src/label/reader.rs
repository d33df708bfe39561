//! Label reader: matcher lookups over the inverted index
//!
//! ```text
//! matchers ──┬─ task ─→ ids (sorted, unique) ─┐
//!            ├─ task ─→ ids                   ├─ intersect → refs → time filter
//!            └─ task ─→ ids                   ┘
//!
//! refs → forward rows per ref → {blob id: labels} − tombstoned → infos
//! ```

use crate::blob::{parse_external_key, sort_infos, Info, Ref, TimeRange};
use crate::index::{BlobStoreSchema, Entry, IndexClient, Query, RangeValue};
use crate::label::matcher::{MatchType, Matcher};
use crate::label::util::{filter_refs_by_time, intersect_strings, unique_strings};
use crate::storage::error::{StorageError, StorageResult};
use std::collections::{btree_map, BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct LabelIndexStore {
    client: Arc<IndexClient>,
    schema: BlobStoreSchema,
}

impl LabelIndexStore {
    pub fn new(client: Arc<IndexClient>, schema: BlobStoreSchema) -> Self {
        Self { client, schema }
    }

    /// Refs under `metric_name` matching every matcher, overlapping `range`.
    ///
    /// No matchers means every blob of the metric. Each matcher runs as its
    /// own task; the first failure is returned and the rest are cancelled.
    pub async fn get_blob_refs(
        &self,
        range: TimeRange,
        user_id: &str,
        metric_name: &str,
        matchers: &[Matcher],
    ) -> StorageResult<Vec<Ref>> {
        let per_matcher: Vec<Option<Matcher>> = if matchers.is_empty() {
            vec![None]
        } else {
            matchers.iter().cloned().map(Some).collect()
        };

        let mut set = JoinSet::new();
        for matcher in per_matcher {
            let client = Arc::clone(&self.client);
            let schema = self.schema.clone();
            let user_id = user_id.to_string();
            let metric_name = metric_name.to_string();
            set.spawn(async move {
                lookup_ids_by_matcher(&client, &schema, range, &user_id, &metric_name, matcher)
                    .await
            });
        }

        let mut ids: Option<Vec<String>> = None;
        while let Some(joined) = set.join_next().await {
            let incoming = joined??;
            ids = Some(match ids {
                None => incoming,
                Some(current) => intersect_strings(&current, &incoming),
            });
        }

        let mut refs = Vec::new();
        for id in ids.unwrap_or_default() {
            refs.push(parse_external_key(&id, user_id)?.blob_ref);
        }
        Ok(filter_refs_by_time(refs, range))
    }

    /// Matching blobs with their labels, newest first
    pub async fn get_blobs(
        &self,
        range: TimeRange,
        user_id: &str,
        metric_name: &str,
        matchers: &[Matcher],
    ) -> StorageResult<Vec<Info>> {
        let refs = self
            .get_blob_refs(range, user_id, metric_name, matchers)
            .await?;
        self.refs_to_blobs(&refs, metric_name).await
    }

    /// Resolve refs to infos, dropping tombstoned blobs and blobs with no
    /// label rows
    pub async fn refs_to_blobs(&self, refs: &[Ref], metric_name: &str) -> StorageResult<Vec<Info>> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }

        let mut queries = Vec::new();
        for r in refs {
            queries.extend(self.schema.metric_label_values_queries(
                r.time_range,
                &r.user_id,
                metric_name,
                &r.external_key(),
            ));
        }
        let entries = lookup_entries(&self.client, queries).await?;

        let mut infos: BTreeMap<String, Info> = BTreeMap::new();
        for entry in entries {
            let label_name = match RangeValue::decode(&entry.range_value)?.label_name() {
                Some(name) => name,
                None => continue,
            };
            let info = match infos.entry(entry.hash_value) {
                btree_map::Entry::Occupied(o) => o.into_mut(),
                btree_map::Entry::Vacant(v) => {
                    let info = parse_external_key(v.key(), "")?;
                    v.insert(info)
                }
            };
            let value = String::from_utf8_lossy(&entry.value).into_owned();
            if !info.labels.has_value(&label_name, &value) {
                info.labels.add(label_name, value);
            }
        }

        let mut result: Vec<Info> = infos
            .into_iter()
            .filter(|(_, info)| !info.is_deleted())
            .map(|(id, mut info)| {
                info.ref_key = id;
                info
            })
            .collect();
        sort_infos(&mut result);
        Ok(result)
    }
}

async fn lookup_ids_by_matcher(
    client: &IndexClient,
    schema: &BlobStoreSchema,
    range: TimeRange,
    user_id: &str,
    metric_name: &str,
    matcher: Option<Matcher>,
) -> StorageResult<Vec<String>> {
    let queries = match &matcher {
        None => schema.read_queries_for_metric(range, user_id, metric_name),
        Some(m) if m.kind == MatchType::Equal => schema.read_queries_for_metric_label_value(
            range,
            user_id,
            metric_name,
            &m.name,
            &m.value,
        ),
        Some(m) => schema.read_queries_for_metric_label(range, user_id, metric_name, &m.name),
    };

    let entries = lookup_entries(client, queries).await?;
    parse_index_entries(&entries, matcher.as_ref())
}

async fn lookup_entries(client: &IndexClient, queries: Vec<Query>) -> StorageResult<Vec<Entry>> {
    let collected: Arc<Mutex<Vec<Entry>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    client
        .query_pages(queries, move |_, batch| {
            let mut entries = sink
                .lock()
                .map_err(|e| StorageError::Lock(e.to_string()))?;
            entries.extend(batch);
            Ok(())
        })
        .await?;

    let mut entries = collected
        .lock()
        .map_err(|e| StorageError::Lock(e.to_string()))?;
    Ok(std::mem::take(&mut *entries))
}

/// Blob ids of the entries accepted by `matcher`, sorted and unique
fn parse_index_entries(entries: &[Entry], matcher: Option<&Matcher>) -> StorageResult<Vec<String>> {
    let set: Option<HashSet<String>> = matcher
        .and_then(Matcher::set_matches)
        .map(|values| values.into_iter().collect());

    let mut result = Vec::with_capacity(entries.len());
    for entry in entries {
        let blob_id = match RangeValue::decode(&entry.range_value)?.blob_id() {
            Some(id) => id,
            None => continue,
        };

        if let Some(matcher) = matcher {
            let value = String::from_utf8_lossy(&entry.value);
            let accepted = match &set {
                Some(set) => set.contains(value.as_ref()),
                None => matcher.matches(&value),
            };
            if !accepted {
                continue;
            }
        }
        result.push(blob_id);
    }

    result.sort();
    Ok(unique_strings(result))
}
