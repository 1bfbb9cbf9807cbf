//! Animal-face (동물상) classification.
//!
//! Archetypes earn fixed points when a keyword of theirs lines up with a trait
//! the eye, nose or chin analyzer emitted, plus a random bonus. The highest
//! total wins; ties keep table order.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::physiognomy::{FacialRegion, FeatureAnalysis};

pub struct Archetype {
    pub name: &'static str,
    pub keywords: [&'static str; 3],
    pub traits: [&'static str; 3],
}

pub const ARCHETYPES: [Archetype; 8] = [
    Archetype {
        name: "고양이상",
        keywords: ["큰 눈", "작은 코", "V라인"],
        traits: ["매력적", "신비로운", "독립적"],
    },
    Archetype {
        name: "강아지상",
        keywords: ["둥근 눈", "친근한 입", "부드러운"],
        traits: ["친근한", "충성스러운", "활발한"],
    },
    Archetype {
        name: "토끼상",
        keywords: ["큰 눈", "작은 입", "둥근 얼굴"],
        traits: ["귀여운", "순수한", "온순한"],
    },
    Archetype {
        name: "여우상",
        keywords: ["날카로운 눈", "뾰족한 턱", "각진"],
        traits: ["영리한", "매혹적", "카리스마"],
    },
    Archetype {
        name: "사슴상",
        keywords: ["큰 눈", "긴 얼굴", "우아한"],
        traits: ["우아한", "순수한", "청순한"],
    },
    Archetype {
        name: "곰상",
        keywords: ["둥근 얼굴", "큰 코", "부드러운"],
        traits: ["온화한", "든든한", "포근한"],
    },
    Archetype {
        name: "늑대상",
        keywords: ["날카로운", "강한 턱", "깊은 눈"],
        traits: ["카리스마", "강인한", "리더십"],
    },
    Archetype {
        name: "햄스터상",
        keywords: ["둥근 얼굴", "작은 눈", "통통한"],
        traits: ["귀여운", "친근한", "애교"],
    },
];

/// (region, archetype keyword, feature trait, points)
const TRAIT_RULES: [(FacialRegion, &str, &str, u32); 9] = [
    (FacialRegion::Eyes, "큰 눈", "뛰어난 공감력", 30),
    (FacialRegion::Eyes, "둥근 눈", "따뜻한 마음", 25),
    (FacialRegion::Eyes, "날카로운 눈", "분석력", 25),
    (FacialRegion::Eyes, "작은 눈", "집중력", 20),
    (FacialRegion::Nose, "작은 코", "온화함", 20),
    (FacialRegion::Nose, "큰 코", "강한 의지력", 25),
    (FacialRegion::Chin, "V라인", "우아함", 25),
    (FacialRegion::Chin, "강한 턱", "리더십", 30),
    (FacialRegion::Chin, "뾰족한 턱", "결단력", 25),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryAnimal {
    pub animal: String,
    pub percentage: u8,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimalFaceAnalysis {
    pub primary_animal: String,
    pub percentage: u8,
    pub characteristics: Vec<String>,
    pub description: String,
    pub secondary_animals: Vec<SecondaryAnimal>,
}

/// Points an archetype earns from the analyzers' traits, before the random bonus.
pub fn trait_score(archetype: &Archetype, features: &[FeatureAnalysis]) -> u32 {
    TRAIT_RULES
        .iter()
        .filter(|(region, keyword, feature_trait, _)| {
            archetype.keywords.contains(keyword)
                && features
                    .iter()
                    .find(|f| f.region == *region)
                    .is_some_and(|f| f.has_trait(feature_trait))
        })
        .map(|(_, _, _, points)| points)
        .sum()
}

pub fn classify_animal_face<R: Rng + ?Sized>(
    features: &[FeatureAnalysis],
    rng: &mut R,
) -> AnimalFaceAnalysis {
    let mut ranked: Vec<(&Archetype, u32)> = ARCHETYPES
        .iter()
        .map(|a| (a, trait_score(a, features) + rng.gen_range(10..30)))
        .collect();
    // stable: equal scores keep table order
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let (primary, primary_score) = ranked[0];
    let secondary_animals = ranked[1..4]
        .iter()
        .map(|(a, score)| SecondaryAnimal {
            animal: a.name.to_string(),
            percentage: score.saturating_sub(20).clamp(10, 40) as u8,
            reason: format!("{}, {} 특성이 보임", a.traits[0], a.traits[1]),
        })
        .collect();

    AnimalFaceAnalysis {
        primary_animal: primary.name.to_string(),
        percentage: primary_score.clamp(60, 95) as u8,
        characteristics: primary.traits.iter().map(|t| t.to_string()).collect(),
        description: describe(primary),
        secondary_animals,
    }
}

fn describe(a: &Archetype) -> String {
    format!(
        "당신은 {name}의 특징을 가지고 계시네요. {all}한 매력이 돋보이며, 이는 {short}처럼 {t0}하고 {t1}한 인상을 줍니다. 특히 얼굴의 전반적인 조화와 각 부위의 특징이 {name}의 매력적인 특성과 잘 어울립니다.",
        name = a.name,
        all = a.traits.join(", "),
        short = a.name.replacen('상', "", 1),
        t0 = a.traits[0],
        t1 = a.traits[1],
    )
}
