//! `#[serde(with = "generic_hashmap")]` for a `HashMap` whose keys are not strings, e.g. the RTT
//! summaries keyed by `(source, target)`. The map is written as a list of `{"key", "value"}`
//! entries, sorted by key such that the same map always produces the same output.

use std::{collections::HashMap, hash::Hash};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Deserialize, Serialize)]
struct Entry<K, V> {
    key: K,
    value: V,
}

pub fn serialize<K, V, S>(map: &HashMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    K: Serialize + Ord,
    V: Serialize,
    S: Serializer,
{
    let mut entries: Vec<Entry<&K, &V>> = map
        .iter()
        .map(|(key, value)| Entry { key, value })
        .collect();
    entries.sort_by(|a, b| a.key.cmp(b.key));
    serializer.collect_seq(entries)
}

pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<HashMap<K, V>, D::Error>
where
    K: Deserialize<'de> + Eq + Hash,
    V: Deserialize<'de>,
    D: Deserializer<'de>,
{
    let entries = Vec::<Entry<K, V>>::deserialize(deserializer)?;
    Ok(entries.into_iter().map(|e| (e.key, e.value)).collect())
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, PartialEq, Deserialize, Serialize)]
    struct Rtts {
        #[serde(with = "crate::serde::generic_hashmap")]
        by_pair: HashMap<(String, String), f64>,
    }

    #[test]
    fn tuple_keys_sorted() {
        let rtts = Rtts {
            by_pair: HashMap::from([
                (("h2".to_string(), "h4".to_string()), 7.5),
                (("h1".to_string(), "h3".to_string()), 2.5),
            ]),
        };
        let json = serde_json::to_string(&rtts).unwrap();
        assert_eq!(
            json,
            r#"{"by_pair":[{"key":["h1","h3"],"value":2.5},{"key":["h2","h4"],"value":7.5}]}"#
        );
        let back: Rtts = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rtts);
    }
}
