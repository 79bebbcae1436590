//! System instruction for the responder
//!
//! The instruction is rebuilt for every query: it carries the current local
//! time and the user's profile, both of which can change between turns.

use std::fmt::Write as _;

use chrono::{DateTime, Datelike, FixedOffset, Offset, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Offset used for the time context (Vietnam, GMT+7)
const LOCAL_UTC_OFFSET_SECS: i32 = 7 * 3600;

const BASE_INSTRUCTION: &str = "\
Bạn là ViVi, một trợ lý giọng nói thân thiện và tinh tế.

Cách trả lời:
- Nói tự nhiên như một người thật, không tự nhận mình là AI hay chương trình máy tính.
- Ngắn gọn, đi thẳng vào vấn đề. Câu đầu tiên phải thật ngắn (dưới 15 từ) để đọc ngay được.
- Trả lời bằng tiếng Việt, trừ khi người dùng nói tiếng Anh.
- Tránh nội dung gây hại; với chủ đề nhạy cảm hãy nhắc nhở khéo léo.

Luôn trả về JSON hợp lệ với các trường:
- \"type\": \"chat\" | \"open_app\" | \"toggle_wifi\" | \"set_timer\"
- \"textResponse\": câu trả lời sẽ được đọc cho người dùng
- \"params\": {\"appName\": tên ứng dụng, \"wifiStatus\": \"on\" | \"off\", \"durationSeconds\": số giây}

Ví dụ: \"Mở YouTube\" -> type \"open_app\", appName \"YouTube\"; \"Tắt Wi-Fi\" -> type \"toggle_wifi\", \
wifiStatus \"off\"; \"Hẹn giờ 5 phút\" -> type \"set_timer\", durationSeconds 300.";

const SEARCH_REMINDER: &str = "\
Bạn có thể dùng công cụ tìm kiếm cho thông tin thời sự (thời tiết, giá cả, tin tức). \
Sau khi tìm kiếm, chỉ trả về đúng một khối JSON như trên, không thêm lời dẫn hay markdown.";

/// How the user wants to be addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    /// Vietnamese second-person address term
    #[must_use]
    pub const fn address_term(self) -> &'static str {
        match self {
            Self::Male => "anh",
            Self::Female => "chị",
            Self::Other => "bạn",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "male" | "nam" => Some(Self::Male),
            "female" | "nữ" | "nu" => Some(Self::Female),
            "other" | "khác" => Some(Self::Other),
            _ => None,
        }
    }
}

/// User profile injected into the instruction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: Option<String>,
    pub gender: Option<Gender>,
    /// Free-form personality request for the assistant
    pub personality: Option<String>,
}

impl UserProfile {
    /// Whether the profile carries anything worth injecting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.as_deref().is_none_or(|n| n.trim().is_empty())
            && self.gender.is_none()
            && self.personality.as_deref().is_none_or(|p| p.trim().is_empty())
    }
}

/// Build the system instruction at the current time
#[must_use]
pub fn system_instruction(profile: Option<&UserProfile>, search_enabled: bool) -> String {
    let offset = FixedOffset::east_opt(LOCAL_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
    build_instruction(profile, search_enabled, Utc::now().with_timezone(&offset))
}

/// Build the system instruction for a given local time
#[must_use]
pub fn build_instruction(
    profile: Option<&UserProfile>,
    search_enabled: bool,
    now: DateTime<FixedOffset>,
) -> String {
    let mut out = String::from(BASE_INSTRUCTION);

    let _ = write!(
        out,
        "\n\nThời gian hiện tại (GMT+7): {}, {}.\n\
         Mọi thông tin về thời tiết, giá cả, tin tức phải dựa trên thời điểm này \
         và mặc định vị trí là Việt Nam.",
        weekday_name(now.weekday()),
        now.format("%d/%m/%Y %H:%M:%S"),
    );

    if let Some(profile) = profile.filter(|p| !p.is_empty()) {
        let name = profile
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let term = profile.gender.map_or("bạn", Gender::address_term);

        out.push_str("\n\nThông tin người dùng:");
        if let Some(name) = name {
            let _ = write!(out, "\n- Tên: \"{name}\".");
        }
        match name {
            Some(name) => {
                let _ = write!(
                    out,
                    "\n- Gọi người dùng là \"{term}\" (tên {name}), thân mật và tự nhiên."
                );
            }
            None => {
                let _ = write!(
                    out,
                    "\n- Gọi người dùng là \"{term}\", thân mật và tự nhiên."
                );
            }
        }

        if let Some(personality) = profile
            .personality
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            let _ = write!(
                out,
                "\n\nTính cách người dùng yêu cầu: \"{personality}\". \
                 Hãy thể hiện tính cách này trong mọi câu trả lời, \
                 nhưng thông tin vẫn phải chính xác."
            );
        }
    }

    if search_enabled {
        out.push_str("\n\n");
        out.push_str(SEARCH_REMINDER);
    }

    out
}

const fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Thứ Hai",
        Weekday::Tue => "Thứ Ba",
        Weekday::Wed => "Thứ Tư",
        Weekday::Thu => "Thứ Năm",
        Weekday::Fri => "Thứ Sáu",
        Weekday::Sat => "Thứ Bảy",
        Weekday::Sun => "Chủ Nhật",
    }
}
