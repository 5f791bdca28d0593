//! Normalization of the decoded `GameInformation` record into the song
//! catalog CSV.

use anyhow::Result;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("decoded record does not have the expected catalog shape: {0}")]
pub struct TransformError(#[from] serde_json::Error);

/// Typed view of the decoded `GameInformation` behaviour. Unknown decoded
/// fields are ignored; `song` must be present.
#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
pub struct GameInformation {
    pub song: IndexMap<String, Vec<SongRecord>>,
    #[serde(default)]
    pub songAllCombos: Vec<ComboRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[allow(non_snake_case)]
pub struct SongRecord {
    #[serde(default)]
    pub songsId: String,
    #[serde(default)]
    pub songsName: String,
    #[serde(default)]
    pub composer: String,
    #[serde(default)]
    pub illustrator: String,
    #[serde(default)]
    pub previewTime: f64,
    #[serde(default)]
    pub previewEndTime: f64,
    #[serde(default)]
    pub levels: Vec<String>,
    #[serde(default)]
    pub charter: Vec<String>,
    #[serde(default)]
    pub difficulty: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
pub struct ComboRecord {
    #[serde(default)]
    pub songsId: String,
    #[serde(default)]
    pub allComboNum: Vec<i64>,
}

impl GameInformation {
    pub fn from_value(value: serde_json::Value) -> Result<GameInformation, TransformError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// One surviving difficulty slot of a song, keyed by level name in the
/// output: `c` charter, `a` full-combo counter, `d` difficulty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub c: String,
    pub a: i64,
    pub d: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRow {
    pub id: String,
    pub name: String,
    pub composer: String,
    pub illustrator: String,
    pub preview_time: f64,
    pub preview_end_time: f64,
    pub levels: IndexMap<String, LevelInfo>,
}

/// Flattens every category into catalog rows, one per song with at least one
/// used difficulty slot. Category identity is not part of the output; only
/// the iteration order survives.
pub fn transform(info: &GameInformation) -> Vec<CatalogRow> {
    let combos: FxHashMap<&str, &ComboRecord> = info
        .songAllCombos
        .iter()
        .map(|combo| (combo.songsId.as_str(), combo))
        .collect();

    let mut rows = Vec::new();
    for songs in info.song.values() {
        for song in songs {
            if song.songsId.is_empty() {
                continue;
            }
            let combo = combos.get(song.songsId.as_str());

            let mut levels = IndexMap::new();
            for (i, &difficulty) in song.difficulty.iter().enumerate() {
                // a difficulty of exactly zero marks an unused level slot
                if difficulty == 0.0 {
                    continue;
                }
                let Some(level_name) = song.levels.get(i) else {
                    tracing::warn!(
                        "song '{}' has difficulty at index {i} but no level name",
                        song.songsId
                    );
                    continue;
                };
                let all_combo_num = combo
                    .and_then(|combo| combo.allComboNum.get(i))
                    .copied()
                    .unwrap_or(0);
                // duplicate level names: last write wins
                levels.insert(
                    level_name.clone(),
                    LevelInfo {
                        c: song.charter.get(i).cloned().unwrap_or_default(),
                        a: all_combo_num,
                        d: round_to(difficulty, 10.0),
                    },
                );
            }
            if levels.is_empty() {
                continue;
            }

            rows.push(CatalogRow {
                id: song.songsId.clone(),
                name: song.songsName.clone(),
                composer: song.composer.clone(),
                illustrator: song.illustrator.clone(),
                preview_time: round_to(song.previewTime, 100.0),
                preview_end_time: round_to(song.previewEndTime, 100.0),
                levels,
            });
        }
    }
    rows
}

const CSV_HEADER: [&str; 7] = [
    "id",
    "name",
    "composer",
    "illustrator",
    "preview_time",
    "preview_end_time",
    "levels",
];

/// Serializes the rows to CSV, with the per-level breakdown embedded as a
/// compact JSON object in the `levels` column.
pub fn write_csv(rows: &[CatalogRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for row in rows {
        let levels = serde_json::to_string(&row.levels)?;
        writer.write_record([
            row.id.as_str(),
            row.name.as_str(),
            row.composer.as_str(),
            row.illustrator.as_str(),
            &row.preview_time.to_string(),
            &row.preview_end_time.to_string(),
            &levels,
        ])?;
    }
    writer.flush()?;
    let data = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to finish csv output: {e}"))?;
    Ok(String::from_utf8(data)?)
}

fn round_to(value: f64, scale: f64) -> f64 {
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: &str, levels: &[&str], charters: &[&str], difficulty: &[f64]) -> SongRecord {
        SongRecord {
            songsId: id.to_owned(),
            songsName: format!("{id} name"),
            composer: "composer".to_owned(),
            illustrator: "illustrator".to_owned(),
            previewTime: 25.351,
            previewEndTime: 40.0,
            levels: levels.iter().map(|s| s.to_string()).collect(),
            charter: charters.iter().map(|s| s.to_string()).collect(),
            difficulty: difficulty.to_vec(),
        }
    }

    fn info(songs: Vec<(&str, Vec<SongRecord>)>, combos: Vec<ComboRecord>) -> GameInformation {
        GameInformation {
            song: songs
                .into_iter()
                .map(|(category, songs)| (category.to_owned(), songs))
                .collect(),
            songAllCombos: combos,
        }
    }

    #[test]
    fn zero_difficulty_slots_are_dropped() {
        let info = info(
            vec![(
                "chapter1",
                vec![song(
                    "song.a",
                    &["EZ", "HD", "IN", "AT"],
                    &["c0", "c1", "c2", "c3"],
                    &[0.0, 7.5, 0.0, 9.2],
                )],
            )],
            vec![],
        );

        let rows = transform(&info);
        assert_eq!(rows.len(), 1);
        let keys: Vec<_> = rows[0].levels.keys().collect();
        assert_eq!(keys, ["HD", "AT"]);
        assert_eq!(rows[0].levels["HD"].d, 7.5);
        assert_eq!(rows[0].levels["AT"].d, 9.2);
    }

    #[test]
    fn all_zero_difficulties_produce_no_row() {
        let info = info(
            vec![("chapter1", vec![song("song.a", &["EZ"], &["c"], &[0.0])])],
            vec![],
        );
        assert!(transform(&info).is_empty());
    }

    #[test]
    fn empty_song_id_is_skipped() {
        let info = info(
            vec![("chapter1", vec![song("", &["EZ"], &["c"], &[3.0])])],
            vec![],
        );
        assert!(transform(&info).is_empty());
    }

    #[test]
    fn short_combo_array_defaults_to_zero() {
        let info = info(
            vec![(
                "chapter1",
                vec![song("song.a", &["EZ", "HD"], &["c0", "c1"], &[3.0, 7.5])],
            )],
            vec![ComboRecord {
                songsId: "song.a".to_owned(),
                allComboNum: vec![441],
            }],
        );

        let rows = transform(&info);
        assert_eq!(rows[0].levels["EZ"].a, 441);
        assert_eq!(rows[0].levels["HD"].a, 0);
    }

    #[test]
    fn difficulty_is_rounded_to_one_decimal() {
        let info = info(
            vec![(
                "chapter1",
                vec![song("song.a", &["IN"], &["c"], &[13.4f32 as f64])],
            )],
            vec![],
        );
        assert_eq!(transform(&info)[0].levels["IN"].d, 13.4);
    }

    #[test]
    fn same_id_across_categories_yields_two_rows() {
        let shared = || song("song.a", &["EZ"], &["c"], &[3.0]);
        let info = info(
            vec![
                ("chapter1", vec![shared()]),
                ("chapter2", vec![shared()]),
            ],
            vec![],
        );
        let rows = transform(&info);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, rows[1].id);
    }

    #[test]
    fn duplicate_level_names_last_write_wins() {
        let info = info(
            vec![(
                "chapter1",
                vec![song("song.a", &["IN", "IN"], &["old", "new"], &[12.0, 14.0])],
            )],
            vec![],
        );
        let rows = transform(&info);
        assert_eq!(rows[0].levels.len(), 1);
        assert_eq!(rows[0].levels["IN"].c, "new");
        assert_eq!(rows[0].levels["IN"].d, 14.0);
    }

    #[test]
    fn empty_collection_yields_header_only_csv() {
        let csv = write_csv(&[]).unwrap();
        assert_eq!(
            csv,
            "id,name,composer,illustrator,preview_time,preview_end_time,levels\n"
        );
    }

    #[test]
    fn embedded_levels_json_round_trips() {
        let info = info(
            vec![(
                "chapter1",
                vec![song(
                    "song.a",
                    &["HD", "AT"],
                    &["某谱师", "charter2"],
                    &[7.5, 9.2],
                )],
            )],
            vec![ComboRecord {
                songsId: "song.a".to_owned(),
                allComboNum: vec![620, 1154],
            }],
        );
        let rows = transform(&info);
        let csv = write_csv(&rows).unwrap();

        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let record = reader.records().next().unwrap().unwrap();
        let parsed: IndexMap<String, LevelInfo> = serde_json::from_str(&record[6]).unwrap();
        assert_eq!(parsed, rows[0].levels);
        // non-ASCII text is embedded unescaped
        assert!(record[6].contains("某谱师"));
    }

    #[test]
    fn preview_times_are_rounded_to_two_decimals() {
        let info = info(
            vec![("chapter1", vec![song("song.a", &["EZ"], &["c"], &[3.0])])],
            vec![],
        );
        let rows = transform(&info);
        assert_eq!(rows[0].preview_time, 25.35);
        assert_eq!(rows[0].preview_end_time, 40.0);
    }

    #[test]
    fn missing_song_field_is_a_transform_error() {
        let err = GameInformation::from_value(serde_json::json!({ "other": 1 })).unwrap_err();
        assert!(err.to_string().contains("song"));
    }
}
