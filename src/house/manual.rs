//! House manual records and the built-in seed set.

use serde::Deserialize;
use std::path::Path;

/// A stored manual entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualRecord {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub keywords: Vec<String>,
}

/// A manual entry before it is stored, as read from a manuals file.
#[derive(Debug, Clone, Deserialize)]
pub struct ManualSeed {
    pub title: String,
    pub body: String,
    /// Comma-separated search tags, or a JSON array of tags.
    #[serde(default, deserialize_with = "deserialize_keywords")]
    pub keywords: Vec<String>,
}

impl ManualSeed {
    fn new(title: &str, body: &str, keywords: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            keywords: split_keywords(keywords),
        }
    }
}

/// Split a stored keyword column. Empty tags (the seed data has a few) are dropped.
pub fn split_keywords(raw: &str) -> Vec<String> {
    raw.split([',', '、', '，'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_keywords(keywords: &[String]) -> String {
    keywords.join(",")
}

fn deserialize_keywords<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Keywords {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match Keywords::deserialize(deserializer)? {
        Keywords::Joined(s) => split_keywords(&s),
        Keywords::List(list) => list
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
    })
}

/// Read a JSON array of manual entries.
pub fn load_manuals_file(path: &Path) -> Result<Vec<ManualSeed>, String> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let seeds: Vec<ManualSeed> = serde_json::from_str(&json)
        .map_err(|e| format!("Failed to parse {}: {e}", path.display()))?;

    if let Some(bad) = seeds.iter().find(|m| m.title.trim().is_empty()) {
        return Err(format!("Manual entry with empty title (body: {:?})", bad.body));
    }
    Ok(seeds)
}

/// The house rules every fresh database starts with.
pub fn default_manuals() -> Vec<ManualSeed> {
    vec![
        ManualSeed::new(
            "使用料",
            "志業シェアハウスの使用料は、月額9,000円です。ただし、使用開始日や退去日の属する月については「月額×使用日数/その月の日数」で算出します。",
            "使用料,月額,部屋,退去日",
        ),
        ManualSeed::new(
            "宿泊",
            "スパルタキャンプ前日から終了日の翌日の宿泊まで、町への申請により「平泉町志業シェアハウス使用許可決定通知書の交付を受けた方のみ、宿泊可能です。使用開始時にシェアハウス玄関と個室の鍵をお渡ししますので、退去まで紛失することのないよう各自で責任をもって管理してください。使用許可者以外の方で無断で施設内に入れることは固く禁止します。スパルタキャンプ受講生で、宿泊以外で学習のため使用したいという方も町への申請が必要となります。(※講座開催期間中に開催される対面サポートは除く) 各部屋の使用後は、戸締まりやエアコン・電灯等を十分に確認し、防犯・節電・節水に努めてください。",
            "宿泊,使用許可,宿泊可,鍵",
        ),
        ManualSeed::new(
            "施錠について",
            "貴重品を管理する金庫等はありませんので、個室を離れる際は必ず施錠するなど防犯に努めて下さい。また、外出の際には必ず玄関を施錠するように心がけて下さい。帰舎時も同様です。 ",
            "施錠,防犯,外出,帰舎,玄関",
        ),
        ManualSeed::new(
            "アメニティ",
            "必要最低限の生活用品は準備しておりますが、アメニティ類はありませんので、必要なものは各自で用意してください。",
            "アメニティ,生活用品,用意,必要,最低限",
        ),
        ManualSeed::new(
            "シェアハウスで準備していない主な物品",
            "歯磨き用品、入浴用品(洗面器、浴室イス以外)、タオル(バスタオル含む)、ドライヤー、屋内用スリッパ(旅館時代のものがありますが数にかぎりがありますので常時使用不可とします)、ティッシュペーパー、座布団等",
            "生活用品,歯磨き,入浴,タオル,ドライヤー,屋内用スリッパ,ティッシュペーパー,座布団",
        ),
        ManualSeed::new(
            "お金に関すること",
            "シェアハウスでは「自分のことは自分で」が基本ルールとなりますが、食費をはじめ、費用を出し合って負担する場合は、例外なく必ず均等に負担してください。年齢や職業などそれぞれ違いはありますが、受講生として立場は同じであることをしっかりと認識し、十分な生活費の準備をお願いします",
            "生活費,均等,負担,お金",
        ),
        ManualSeed::new(
            "ゴミ出しルール",
            "燃えるゴミは月/木の朝8:00までに玄関前のカゴへ。ラベル貼付＆袋口を結ぶこと。",
            "ゴミ出し,ルール,燃えるゴミ,ごみ,ゴミ",
        ),
        ManualSeed::new(
            "静音タイム",
            "22:00〜7:00は通話・音楽・ドアの開閉音に配慮。共用部での打合せは避ける。",
            "静音,時間,ルール,夜",
        ),
        ManualSeed::new(
            "共有キッチン",
            "調理後は5分以内に片付け。シンク洗浄・コンロ拭き・生ゴミは密封廃棄。",
            "キッチン,共有,ルール,清掃,台所",
        ),
        ManualSeed::new(
            "施設概要",
            "平泉町志業シェアハウスは岩手県西磐井郡平泉町にあります。個室5室と共用部（キッチン、リビングなど）が利用可能です。",
            "概要,場所,アクセス,部屋,設備,平泉町",
        ),
        ManualSeed::new(
            "アクセス",
            "自動車は平泉前沢ICまたは平泉スマートICから5分、電車はJR平泉駅から徒歩10分です。",
            "アクセス,交通,自動車,電車,平泉駅",
        ),
    ]
}
