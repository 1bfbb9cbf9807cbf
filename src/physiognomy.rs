//! Rule-based face reading.
//!
//! Five per-region analyzers turn landmark groups into scored
//! [`FeatureAnalysis`] entries. Each compares one statistic against a high
//! and a low cutoff and picks a narrative branch; the chin branches on gender
//! instead. Several statistics are fixed estimates rather than measurements,
//! and overall balance/harmony are random draws, so only the forehead
//! reacts to actual geometry.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::animal::{classify_animal_face, AnimalFaceAnalysis};
use crate::error::Error;
use crate::landmarks::{EyePair, FacialLandmarks};
use crate::measurements::{round2, span_or, DetailedMeasurements};
use crate::types::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            other => Err(Error::Validation(vec![format!(
                "gender: expected 'male' or 'female', got '{other}'"
            )])),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacialRegion {
    Forehead,
    Eyes,
    Nose,
    Mouth,
    Chin,
}

impl FacialRegion {
    /// Output order of the feature list.
    pub const ALL: [FacialRegion; 5] = [
        FacialRegion::Forehead,
        FacialRegion::Eyes,
        FacialRegion::Nose,
        FacialRegion::Mouth,
        FacialRegion::Chin,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FacialRegion::Forehead => "이마 (지혜와 사고력)",
            FacialRegion::Eyes => "눈 (감정과 인간관계)",
            FacialRegion::Nose => "코 (의지력과 재물운)",
            FacialRegion::Mouth => "입 (표현력과 소통능력)",
            FacialRegion::Chin => "턱 (인내력과 추진력)",
        }
    }

    pub fn meaning(&self) -> &'static str {
        match self {
            FacialRegion::Forehead => "관상학에서 지능과 사고력을 나타냄",
            FacialRegion::Eyes => "마음의 창, 감정 표현력을 나타냄",
            FacialRegion::Nose => "의지력과 경제관념을 나타냄",
            FacialRegion::Mouth => "언어 능력과 사회성을 나타냄",
            FacialRegion::Chin => "의지력과 인내력을 나타냄",
        }
    }
}

/// Sparse measurements; absent fields are omitted from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMeasurements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureAnalysis {
    pub region: FacialRegion,
    pub feature: String,
    pub score: u8,
    pub interpretation: String,
    pub meaning: String,
    pub traits: Vec<String>,
    pub measurements: FeatureMeasurements,
    pub detailed_analysis: String,
}

impl FeatureAnalysis {
    fn new(region: FacialRegion, reading: Reading, measurements: FeatureMeasurements) -> Self {
        Self {
            region,
            feature: region.label().to_string(),
            score: reading.score,
            interpretation: reading.interpretation.to_string(),
            meaning: region.meaning().to_string(),
            traits: reading.traits.iter().map(|t| t.to_string()).collect(),
            measurements,
            detailed_analysis: reading.detail,
        }
    }

    pub fn has_trait(&self, name: &str) -> bool {
        self.traits.iter().any(|t| t == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallAssessment {
    pub balance: u32,
    pub harmony: u32,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysiognomyResults {
    pub overall: OverallAssessment,
    pub features: Vec<FeatureAnalysis>,
    pub recommendations: Vec<String>,
    pub animal_face: AnimalFaceAnalysis,
    pub detailed_measurements: DetailedMeasurements,
}

impl PhysiognomyResults {
    pub fn feature(&self, region: FacialRegion) -> Option<&FeatureAnalysis> {
        self.features.iter().find(|f| f.region == region)
    }

    pub fn average_score(&self) -> f64 {
        average_score(&self.features)
    }
}

/// Which side of the two cutoffs a statistic falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tendency {
    Pronounced,
    Subdued,
    Neutral,
}

impl Tendency {
    pub fn classify(value: f64, high: f64, low: f64) -> Self {
        if value > high {
            Tendency::Pronounced
        } else if value < low {
            Tendency::Subdued
        } else {
            Tendency::Neutral
        }
    }
}

struct Reading {
    score: u8,
    interpretation: &'static str,
    traits: &'static [&'static str],
    detail: String,
}

fn clamp_score(base: i32, delta: i32) -> u8 {
    (base + delta).clamp(0, 100) as u8
}

/// Run every rule against the landmarks using the thread-local RNG.
pub fn analyze_physiognomy(
    landmarks: &FacialLandmarks,
    gender: Option<Gender>,
) -> PhysiognomyResults {
    analyze_physiognomy_with_rng(landmarks, gender, &mut rand::thread_rng())
}

/// Run every rule against the landmarks, drawing randomness from `rng`.
pub fn analyze_physiognomy_with_rng<R: Rng + ?Sized>(
    landmarks: &FacialLandmarks,
    gender: Option<Gender>,
    rng: &mut R,
) -> PhysiognomyResults {
    let features = vec![
        analyze_forehead(&landmarks.forehead),
        analyze_eyes(&landmarks.eyes),
        analyze_nose(&landmarks.nose),
        analyze_mouth(&landmarks.mouth),
        analyze_chin(&landmarks.chin, gender),
    ];

    let overall = assess_overall(&features, rng);
    let detailed_measurements = DetailedMeasurements::from_landmarks(landmarks);
    let animal_face = classify_animal_face(&features, rng);
    let recommendations = generate_recommendations(&features);

    debug!(
        average = average_score(&features),
        balance = overall.balance,
        harmony = overall.harmony,
        animal = %animal_face.primary_animal,
        "physiognomy analysis complete"
    );

    PhysiognomyResults {
        overall,
        features,
        recommendations,
        animal_face,
        detailed_measurements,
    }
}

pub fn analyze_forehead(forehead: &[Point]) -> FeatureAnalysis {
    let width = span_or(
        forehead.get(1).map(|p| p.x),
        forehead.first().map(|p| p.x),
        50.0,
    );
    let height = 30.0;
    let ratio = width / height;

    let reading = match Tendency::classify(width, 60.0, 40.0) {
        Tendency::Pronounced => Reading {
            score: clamp_score(70, 10),
            interpretation: "넓고 높은 이마를 가지고 계시네요. 전통 관상학에서는 이런 이마를 가진 분을 지적 호기심이 왕성하고 창의적인 사고력을 지닌 사람으로 봅니다.",
            traits: &["높은 지능", "창의적 사고", "리더십 기질"],
            detail: format!(
                "이마 폭이 {width:.1}px로 평균보다 넓어 학습능력과 기억력이 우수하며, 복잡한 문제해결을 즐기는 성향을 보입니다. 비율 {ratio:.2}:1로 이상적인 황금비율에 근접합니다."
            ),
        },
        Tendency::Subdued => Reading {
            score: clamp_score(70, -5),
            interpretation: "아담한 이마를 가지고 계시네요. 실용적이고 현실적인 사고를 하시는 분으로 보입니다.",
            traits: &["실용성", "현실적 사고"],
            detail: format!(
                "이마 폭이 {width:.1}px로 아담하여 집중력이 뛰어나고 세심한 작업을 선호하는 성향을 나타냅니다. 현실적이고 체계적인 사고방식을 가지고 계십니다."
            ),
        },
        Tendency::Neutral => Reading {
            score: clamp_score(70, 0),
            interpretation: "균형잡힌 이마를 가지고 계시네요.",
            traits: &["지적 호기심", "창의성"],
            detail: format!(
                "이마 폭 {width:.1}px, 높이 {height:.1}px로 균형잡힌 비율을 보입니다. 논리적 사고와 감성적 판단의 조화로운 균형을 나타냅니다."
            ),
        },
    };

    FeatureAnalysis::new(
        FacialRegion::Forehead,
        reading,
        FeatureMeasurements {
            width: Some(width.round() as i64),
            height: Some(height.round() as i64),
            ratio: Some(round2(ratio)),
            ..Default::default()
        },
    )
}

pub fn analyze_eyes(eyes: &EyePair) -> FeatureAnalysis {
    // Eye width is estimated from whether the eye was located at all.
    let eye_width = |pts: &[Point]| if pts.is_empty() { 15.0 } else { 20.0 };
    let left_width: f64 = eye_width(eyes.left.as_slice());
    let right_width: f64 = eye_width(eyes.right.as_slice());
    let avg_width = (left_width + right_width) / 2.0;
    let symmetry = (left_width - right_width).abs();
    let symmetry_index = 100.0 - symmetry * 10.0;
    let distance = 35.0;

    let reading = match Tendency::classify(avg_width, 22.0, 18.0) {
        Tendency::Pronounced => Reading {
            score: clamp_score(75, 10),
            interpretation: "크고 표현력이 풍부한 눈을 가지고 계시네요. 이는 타인에 대한 배려심이 깊고 공감 능력이 뛰어난 성격을 나타냅니다.",
            traits: &["뛰어난 공감력", "따뜻한 마음", "표현력"],
            detail: format!(
                "눈의 평균 폭이 {avg_width:.1}px로 큰 편에 속하며, 눈 간격은 {distance}px입니다. 대칭성 지수 {symmetry_index:.0}%로 균형잡힌 눈매를 가지고 계십니다. 큰 눈은 감정 표현이 풍부하고 타인의 마음을 잘 읽는 능력을 나타냅니다."
            ),
        },
        Tendency::Subdued => Reading {
            score: clamp_score(75, 5),
            interpretation: "집중력이 좋고 신중한 성격을 나타내는 눈매를 가지고 계십니다.",
            traits: &["집중력", "신중함", "분석력"],
            detail: format!(
                "눈의 평균 폭이 {avg_width:.1}px로 아담하며, 눈 간격 {distance}px로 적절한 비율을 보입니다. 작은 눈은 집중력이 뛰어나고 세밀한 관찰력을 가진 분석적 성격을 나타냅니다."
            ),
        },
        Tendency::Neutral => Reading {
            score: clamp_score(75, 0),
            interpretation: "온화하고 따뜻한 눈매를 가지고 계십니다.",
            traits: &["감정 표현", "공감 능력"],
            detail: format!(
                "눈의 평균 폭 {avg_width:.1}px, 간격 {distance}px로 균형잡힌 비율입니다. 좌우 대칭성 {symmetry_index:.0}%로 안정적인 감정 상태와 원만한 대인관계를 나타냅니다."
            ),
        },
    };

    FeatureAnalysis::new(
        FacialRegion::Eyes,
        reading,
        FeatureMeasurements {
            width: Some(avg_width.round() as i64),
            distance: Some(distance as i64),
            ratio: Some(round2(avg_width / distance)),
            ..Default::default()
        },
    )
}

pub fn analyze_nose(nose: &[Point]) -> FeatureAnalysis {
    let height: f64 = if nose.is_empty() { 35.0 } else { 40.0 };
    let width = 15.0;
    let ratio = height / width;
    let angle = 95.0;

    let reading = match Tendency::classify(height, 45.0, 35.0) {
        Tendency::Pronounced => Reading {
            score: clamp_score(80, 10),
            interpretation: "높고 곧은 콧날을 가지고 계시네요. 이는 강한 의지력과 목표 달성 능력, 그리고 좋은 재물운을 의미합니다.",
            traits: &["강한 의지력", "목표 지향적", "재물운"],
            detail: format!(
                "코 높이 {height:.1}px, 폭 {width:.1}px로 높은 콧날을 가지고 계십니다. 높이-폭 비율 {ratio:.2}:1로 이상적인 비율이며, 콧날 각도 {angle}°로 강한 의지력과 추진력을 나타냅니다. 높은 코는 전통 관상학에서 재물운과 사회적 지위 상승을 의미합니다."
            ),
        },
        Tendency::Subdued => Reading {
            score: clamp_score(80, -5),
            interpretation: "부드럽고 친근한 인상의 코를 가지고 계시네요. 온화하고 협조적인 성격을 나타냅니다.",
            traits: &["온화함", "협조성", "친화력"],
            detail: format!(
                "코 높이 {height:.1}px로 부드러운 인상이며, 폭 {width:.1}px와의 비율 {ratio:.2}:1로 조화로운 비율을 보입니다. 낮은 코는 겸손하고 친화적인 성품을 나타내며, 타인과의 협력을 중시하는 성향을 의미합니다."
            ),
        },
        Tendency::Neutral => Reading {
            score: clamp_score(80, 0),
            interpretation: "곧고 균형잡힌 콧날을 가지고 계시네요.",
            traits: &["의지력", "리더십"],
            detail: format!(
                "코 높이 {height:.1}px, 폭 {width:.1}px로 균형잡힌 비율 {ratio:.2}:1을 보입니다. 콧날 각도 {angle}°로 적절한 형태로, 의지력과 온화함의 조화를 나타냅니다."
            ),
        },
    };

    FeatureAnalysis::new(
        FacialRegion::Nose,
        reading,
        FeatureMeasurements {
            height: Some(height.round() as i64),
            width: Some(width as i64),
            ratio: Some(round2(ratio)),
            angle: Some(angle as i64),
            ..Default::default()
        },
    )
}

pub fn analyze_mouth(mouth: &[Point]) -> FeatureAnalysis {
    let width: f64 = if mouth.is_empty() { 20.0 } else { 25.0 };
    let height = 8.0;
    let curvature = 15.0;

    let reading = match Tendency::classify(width, 30.0, 20.0) {
        Tendency::Pronounced => Reading {
            score: clamp_score(75, 10),
            interpretation: "풍부한 표현력을 가진 입술이시네요. 뛰어난 소통 능력과 사교성을 나타냅니다.",
            traits: &["뛰어난 소통력", "사교성", "표현력"],
            detail: format!(
                "입술 폭 {width:.1}px로 넓은 편이며, 두께 {height:.1}px로 풍성한 입술을 가지고 계십니다. 입꼬리 곡선 {curvature}°로 자연스러운 미소를 띠고 있어 친화력과 사교성이 뛰어난 성격을 나타냅니다. 큰 입은 표현력이 풍부하고 리더십을 발휘하는 성향을 의미합니다."
            ),
        },
        Tendency::Subdued => Reading {
            score: clamp_score(75, 5),
            interpretation: "신중하고 사려깊은 말씀을 하시는 분으로 보입니다. 깊이있는 대화를 선호하시는 성격입니다.",
            traits: &["신중함", "깊이있는 사고", "진중함"],
            detail: format!(
                "입술 폭 {width:.1}px로 아담하며, 두께 {height:.1}px로 단정한 입술 모양입니다. 작은 입은 신중하고 사려깊은 성격을 나타내며, 말을 아껴 하지만 할 때는 의미있는 말을 하는 성향을 보입니다."
            ),
        },
        Tendency::Neutral => Reading {
            score: clamp_score(75, 0),
            interpretation: "적당한 크기의 균형잡힌 입술을 가지고 계십니다.",
            traits: &["소통 능력", "표현력"],
            detail: format!(
                "입술 폭 {width:.1}px, 두께 {height:.1}px로 균형잡힌 비율을 보입니다. 입꼬리 곡선 {curvature}°로 자연스러운 표정을 가지고 있어 적절한 소통능력과 표현력을 나타냅니다."
            ),
        },
    };

    FeatureAnalysis::new(
        FacialRegion::Mouth,
        reading,
        FeatureMeasurements {
            width: Some(width.round() as i64),
            height: Some(height as i64),
            angle: Some(curvature as i64),
            ..Default::default()
        },
    )
}

/// The chin reading depends only on gender; its geometry is not measured.
pub fn analyze_chin(_chin: &[Point], gender: Option<Gender>) -> FeatureAnalysis {
    let width = 40.0_f64;
    let sharpness = 75.0_f64;
    let prominence = 60.0_f64;

    let reading = match gender {
        Some(Gender::Male) => Reading {
            score: clamp_score(70, 10),
            interpretation: "남성적이고 결단력있는 턱선을 가지고 계십니다. 리더십과 추진력을 나타냅니다.",
            traits: &["리더십", "결단력", "추진력"],
            detail: format!(
                "턱 폭 {width:.1}px, 각진 정도 {sharpness}%로 남성다운 강한 턱선을 보입니다. 턱 돌출도 {prominence}%로 의지력과 추진력이 강한 성격을 나타냅니다. 각진 턱은 결단력과 리더십을 상징합니다."
            ),
        },
        Some(Gender::Female) => Reading {
            score: clamp_score(70, 5),
            interpretation: "우아하고 부드러운 턱선을 가지고 계시네요. 조화로운 성격과 배려심을 나타냅니다.",
            traits: &["우아함", "배려심", "조화"],
            detail: format!(
                "턱 폭 {width:.1}px로 적절한 크기이며, 부드러운 곡선 {}%로 여성스러운 우아함을 나타냅니다. 턱 돌출도 {prominence}%로 온화하면서도 의지가 있는 성격을 보여줍니다.",
                100.0 - sharpness
            ),
        },
        None => Reading {
            score: clamp_score(70, 0),
            interpretation: "안정감있는 턱선을 가지고 계시네요.",
            traits: &["안정성", "인내력"],
            detail: format!(
                "턱 폭 {width:.1}px, 각진 정도 {sharpness}%로 균형잡힌 턱선을 가지고 계십니다. 턱 돌출도 {prominence}%로 안정적인 성격과 적절한 의지력을 나타냅니다."
            ),
        },
    };

    FeatureAnalysis::new(
        FacialRegion::Chin,
        reading,
        FeatureMeasurements {
            width: Some(width as i64),
            angle: Some(sharpness as i64),
            distance: Some(prominence as i64),
            ..Default::default()
        },
    )
}

pub fn average_score(features: &[FeatureAnalysis]) -> f64 {
    if features.is_empty() {
        return 0.0;
    }
    features.iter().map(|f| f64::from(f.score)).sum::<f64>() / features.len() as f64
}

/// Balance and harmony are random draws in [75, 95) and [70, 95); the summary
/// follows the average feature score.
pub fn assess_overall<R: Rng + ?Sized>(features: &[FeatureAnalysis], rng: &mut R) -> OverallAssessment {
    let balance = rng.gen_range(75..95);
    let harmony = rng.gen_range(70..95);
    let average = average_score(features);

    let summary = if average >= 80.0 {
        "전반적으로 매우 균형잡힌 관상을 가지고 계십니다. 강한 의지력과 따뜻한 마음을 동시에 지니고 있어 리더십을 발휘하면서도 주변 사람들과 원만한 관계를 유지하실 수 있는 분이시네요."
    } else if average >= 65.0 {
        "조화로운 관상을 가지고 계시며, 각 부위별로 고유한 매력과 장점을 지니고 계십니다. 균형잡힌 성격으로 다양한 분야에서 능력을 발휘하실 수 있을 것입니다."
    } else {
        "개성있는 관상을 가지고 계시네요. 각 부위별로 독특한 특징들이 있어 특별한 매력을 발산하실 수 있는 분입니다."
    };

    OverallAssessment {
        balance,
        harmony,
        summary: summary.to_string(),
    }
}

pub fn generate_recommendations(features: &[FeatureAnalysis]) -> Vec<String> {
    let mut recommendations = Vec::with_capacity(4);

    if features.iter().any(|f| f.score < 60) {
        recommendations.push("자신의 독특한 매력을 더욱 부각시킬 수 있는 스타일링을 시도해보세요.".to_string());
        recommendations.push("내면의 아름다움을 기르는 것이 외모의 조화를 더욱 향상시킬 수 있습니다.".to_string());
    }

    recommendations.push("규칙적인 생활습관과 긍정적인 마음가짐이 관상을 더욱 좋게 만듭니다.".to_string());
    recommendations.push("자신만의 장점을 잘 알고 활용하는 것이 중요합니다.".to_string());

    recommendations
}
