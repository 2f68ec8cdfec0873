//! Response envelope normalization.
//!
//! List endpoints answer in one of three shapes depending on the endpoint and
//! server version: a bare array, a paginated `{results, count}` object, or a
//! `{data}` wrapper. Anything else degrades to an empty list; this never fails.
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeShape {
    Bare,
    Results,
    Data,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub items: Vec<Value>,
    pub total_count: u64,
    pub shape: EnvelopeShape,
}

impl Normalized {
    /// Only `{results, count}` bodies are paginated by the server.
    pub fn is_paginated(&self) -> bool {
        self.shape == EnvelopeShape::Results
    }

    /// Decode items as `T`, skipping (and logging) any that do not fit.
    pub fn decode<T: DeserializeOwned>(self) -> (Vec<T>, usize) {
        let mut skipped = 0;
        let items = self
            .items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<T>(item) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    skipped += 1;
                    warn!(%err, "skipping list item that does not match the expected shape");
                    None
                }
            })
            .collect();
        (items, skipped)
    }
}

pub fn normalize(body: &Value) -> Normalized {
    if let Some(items) = body.as_array() {
        return Normalized {
            items: items.clone(),
            total_count: items.len() as u64,
            shape: EnvelopeShape::Bare,
        };
    }

    if let Some(results) = body.get("results") {
        let items = results.as_array().cloned().unwrap_or_default();
        let total_count = body
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(items.len() as u64);
        return Normalized {
            items,
            total_count,
            shape: EnvelopeShape::Results,
        };
    }

    if let Some(data) = body.get("data") {
        let items = data.as_array().cloned().unwrap_or_default();
        return Normalized {
            total_count: items.len() as u64,
            items,
            shape: EnvelopeShape::Data,
        };
    }

    Normalized {
        items: Vec::new(),
        total_count: 0,
        shape: EnvelopeShape::Unknown,
    }
}

/// Items of any list body as `T`, whatever its envelope.
pub fn decode_list<T: DeserializeOwned>(body: &Value) -> Vec<T> {
    normalize(body).decode().0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn all_shapes_agree_on_equivalent_content() {
        let items = json!([{ "id": 1 }, { "id": 2 }]);
        let bare = normalize(&items);
        let results = normalize(&json!({ "results": items, "count": 2 }));
        let data = normalize(&json!({ "data": items }));

        for n in [&bare, &results, &data] {
            assert_eq!(n.items, items.as_array().unwrap().clone());
            assert_eq!(n.total_count, 2);
        }
        assert_eq!(bare.shape, EnvelopeShape::Bare);
        assert_eq!(results.shape, EnvelopeShape::Results);
        assert_eq!(data.shape, EnvelopeShape::Data);
    }

    #[test]
    fn results_count_is_server_total() {
        let n = normalize(&json!({ "results": [{ "id": 1 }], "count": 41, "next": "..." }));
        assert_eq!(n.items.len(), 1);
        assert_eq!(n.total_count, 41);
        assert!(n.is_paginated());
    }

    #[test]
    fn results_without_count_uses_length() {
        let n = normalize(&json!({ "results": [{ "id": 1 }, { "id": 2 }, { "id": 3 }] }));
        assert_eq!(n.total_count, 3);
    }

    #[test]
    fn malformed_bodies_degrade_to_empty() {
        for body in [
            json!({ "results": "oops", "count": 5 }),
            json!({ "data": { "id": 1 } }),
            json!({ "detail": "nope" }),
            json!(null),
            json!("text"),
            json!(7),
        ] {
            let n = normalize(&body);
            assert!(n.items.is_empty(), "{body}");
        }
        assert_eq!(normalize(&json!({ "data": { "id": 1 } })).total_count, 0);
        assert_eq!(normalize(&json!(null)).shape, EnvelopeShape::Unknown);
    }

    #[test]
    fn results_takes_precedence_over_data() {
        let n = normalize(&json!({ "results": [{ "id": 1 }], "data": [{ "id": 2 }, { "id": 3 }] }));
        assert_eq!(n.shape, EnvelopeShape::Results);
        assert_eq!(n.items, vec![json!({ "id": 1 })]);
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: i64,
    }

    #[test]
    fn decode_skips_rows_of_the_wrong_shape() {
        let n = normalize(&json!([{ "id": 1 }, { "id": "x" }, { "id": 3 }]));
        let (rows, skipped) = n.decode::<Row>();
        assert_eq!(rows, vec![Row { id: 1 }, Row { id: 3 }]);
        assert_eq!(skipped, 1);
    }
}
