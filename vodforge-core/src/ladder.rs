//! Rendition planning. The planner is the single source of truth for the
//! bitrate/resolution constants shared by the transcode stage and the
//! master-playlist writer.

/// Fixed quality policies. `Single` means "no ladder": one rendition whose
/// engine-written playlist is the final manifest. `Multi` is the fixed
/// 720p + 480p ladder with a synthesized master playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPolicy {
    Single,
    Multi,
}

impl QualityPolicy {
    pub fn from_multi_flag(multi: bool) -> Self {
        if multi {
            QualityPolicy::Multi
        } else {
            QualityPolicy::Single
        }
    }
}

/// One quality variant of the transcoded output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub video_kbps: u32,
    pub audio_kbps: u32,
}

impl Rendition {
    /// ffmpeg scale filter argument, width derived to keep aspect.
    pub fn scale(&self) -> String {
        format!("-2:{}", self.height)
    }

    pub fn video_bitrate(&self) -> String {
        format!("{}k", self.video_kbps)
    }

    pub fn audio_bitrate(&self) -> String {
        format!("{}k", self.audio_kbps)
    }

    /// Master-playlist bandwidth estimate: video ceiling plus a fixed
    /// 200 kbps allowance for audio and container overhead.
    pub fn bandwidth(&self) -> u64 {
        (self.video_kbps as u64 + 200) * 1000
    }

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

const RENDITION_720: Rendition = Rendition {
    name: "720p",
    width: 1280,
    height: 720,
    video_kbps: 3000,
    audio_kbps: 128,
};

const RENDITION_480: Rendition = Rendition {
    name: "480p",
    width: 854,
    height: 480,
    video_kbps: 1500,
    audio_kbps: 96,
};

/// Ordered ladder, highest quality first.
#[derive(Debug, Clone)]
pub struct RenditionPlan {
    policy: QualityPolicy,
    renditions: Vec<Rendition>,
}

impl RenditionPlan {
    pub fn policy(&self) -> QualityPolicy {
        self.policy
    }

    pub fn renditions(&self) -> &[Rendition] {
        &self.renditions
    }

    /// True when the plan carries more than one rendition and therefore
    /// requires a synthesized master playlist.
    pub fn is_ladder(&self) -> bool {
        self.renditions.len() > 1
    }
}

/// Pure and total: every policy maps to exactly one plan.
pub fn plan(policy: QualityPolicy) -> RenditionPlan {
    let renditions = match policy {
        QualityPolicy::Single => vec![RENDITION_720],
        QualityPolicy::Multi => vec![RENDITION_720, RENDITION_480],
    };
    RenditionPlan {
        policy,
        renditions,
    }
}
