use serde_json::{json, Value};

/// Closed set of response languages. Unknown values fall back to Korean
/// rather than erroring; language choice is low-risk input and availability
/// wins over strictness here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Ko,
    En,
    Ja,
}

impl Language {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Self::En,
            "ja" => Self::Ja,
            _ => Self::Ko,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ko => "ko",
            Self::En => "en",
            Self::Ja => "ja",
        }
    }

    pub const ALL: [Language; 3] = [Language::Ko, Language::En, Language::Ja];
}

/// Closed set of advisor tones; unknown values fall back to `Gentle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Gentle,
    Praise,
    Factual,
    Coach,
    Humorous,
}

impl Tone {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "praise" => Self::Praise,
            "factual" => Self::Factual,
            "coach" => Self::Coach,
            "humorous" => Self::Humorous,
            _ => Self::Gentle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gentle => "gentle",
            Self::Praise => "praise",
            Self::Factual => "factual",
            Self::Coach => "coach",
            Self::Humorous => "humorous",
        }
    }

    pub const ALL: [Tone; 5] = [
        Tone::Gentle,
        Tone::Praise,
        Tone::Factual,
        Tone::Coach,
        Tone::Humorous,
    ];
}

pub fn tone_description(lang: Language, tone: Tone) -> &'static str {
    use Language::*;
    use Tone::*;
    match (lang, tone) {
        (Ko, Gentle) => "온화하고 부드러운 어조로, 사용자를 배려하며 친근하게 조언해주세요.",
        (Ko, Praise) => "칭찬과 격려를 아끼지 않는 긍정적인 어조로, 잘한 점을 부각시켜주세요.",
        (Ko, Factual) => "객관적이고 직설적인 어조로, 팩트 기반의 냉정한 분석을 제공해주세요. 감정적 표현 없이 현실을 직시하게 해주세요.",
        (Ko, Coach) => "코치처럼 동기부여하는 어조로, 목표 달성을 위한 구체적인 방향을 제시해주세요.",
        (Ko, Humorous) => "유머러스하고 재치있는 어조로, 가벼운 농담을 섞어 분석해주세요.",
        (En, Gentle) => "Use a warm and gentle tone, being considerate and friendly in your advice.",
        (En, Praise) => "Use a positive and encouraging tone, highlighting what the user is doing well.",
        (En, Factual) => "Use an objective and direct tone, providing cold, fact-based analysis without emotional expressions.",
        (En, Coach) => "Use a motivating coach-like tone, providing specific directions for achieving goals.",
        (En, Humorous) => "Use a humorous and witty tone, mixing in light jokes with your analysis.",
        (Ja, Gentle) => "温かく優しい口調で、ユーザーに配慮しながら親しみやすくアドバイスしてください。",
        (Ja, Praise) => "褒めることを惜しまない前向きな口調で、良い点を強調してください。",
        (Ja, Factual) => "客観的で直接的な口調で、感情的な表現なしに事実に基づいた冷静な分析を提供してください。",
        (Ja, Coach) => "コーチのようにモチベーションを高める口調で、目標達成のための具体的な方向性を示してください。",
        (Ja, Humorous) => "ユーモラスで機知に富んだ口調で、軽いジョークを交えながら分析してください。",
    }
}

/// Stronger tone instruction used only for the one-liner field.
pub fn one_liner_tone(lang: Language, tone: Tone) -> &'static str {
    use Language::*;
    use Tone::*;
    match (lang, tone) {
        (Ko, Gentle) => "따뜻하게 위로하고 감싸주는 다정한 한 마디 (예: '충분히 잘하고 있어요, 조금씩 나아지면 돼요~')",
        (Ko, Praise) => "열렬히 칭찬하고 응원하는 한 마디 (예: '와! 정말 대단해요! 이 정도면 재테크 고수!')",
        (Ko, Factual) => "뼈 때리는 팩폭 한 마디, 현실을 냉정하게 직시시키는 독설 (예: '솔직히? 이러다 거지됩니다.')",
        (Ko, Coach) => "강력하게 동기부여하는 한 마디 (예: '지금이 바로 변화할 때입니다! 할 수 있어요!')",
        (Ko, Humorous) => "빵 터지는 재치있는 농담 한 마디 (예: '지갑이 다이어트 중이시네요~ 곧 식스팩 나오겠어요!')",
        (En, Gentle) => "A warm, comforting one-liner (e.g., 'You're doing fine, take it one step at a time~')",
        (En, Praise) => "An enthusiastic praise (e.g., 'Wow! You're absolutely crushing it! Financial genius!')",
        (En, Factual) => "A brutally honest reality check (e.g., 'Honestly? Keep this up and you're going broke.')",
        (En, Coach) => "A powerful motivational punch (e.g., 'Now is the time to change! You've got this!')",
        (En, Humorous) => "A hilarious witty joke (e.g., 'Your wallet is on a diet~ Six-pack abs coming soon!')",
        (Ja, Gentle) => "温かく慰めてくれる一言（例：'十分頑張っていますよ、少しずつで大丈夫~'）",
        (Ja, Praise) => "熱烈に褒めてくれる一言（例：'すごい！これは財テクの達人レベル！'）",
        (Ja, Factual) => "痛い事実を突きつける一言（例：'正直に言うと？このままだと破産しますよ。'）",
        (Ja, Coach) => "強力にモチベーションを高める一言（例：'今こそ変わる時です！できます！'）",
        (Ja, Humorous) => "思わず笑ってしまう一言（例：'お財布がダイエット中ですね～もうすぐシックスパック！'）",
    }
}

fn system_template(lang: Language) -> &'static str {
    match lang {
        Language::Ko => {
            "당신은 개인 가계부 데이터를 분석하는 전문 재무 상담 AI입니다.\n\
             제공된 가계부 데이터를 분석하고 실행 가능한 인사이트를 제공해주세요.\n\
             소비 패턴, 절약 가능성, 재정 건전성에 초점을 맞춰주세요.\n\n\
             [응답 스타일]\n{tone}\n\n\
             [주의사항]\n\
             - 부적절하거나 불쾌한 표현을 절대 사용하지 마세요.\n\
             - 전문적이고 건전한 재무 조언만 제공하세요.\n\
             - 반드시 한국어로 응답하세요."
        }
        Language::En => {
            "You are a professional financial advisor AI that analyzes personal budget data.\n\
             Analyze the provided budget data and provide actionable insights.\n\
             Focus on spending patterns, potential savings, and financial health.\n\n\
             [Response Style]\n{tone}\n\n\
             [Important Notes]\n\
             - Never use inappropriate or offensive language.\n\
             - Only provide professional and sound financial advice.\n\
             - You must respond in English."
        }
        Language::Ja => {
            "あなたは個人の予算データを分析するプロのファイナンシャルアドバイザーAIです。\n\
             提供された予算データを分析し、実用的な洞察を提供してください。\n\
             支出パターン、節約の可能性、財務の健全性に焦点を当ててください。\n\n\
             [応答スタイル]\n{tone}\n\n\
             [注意事項]\n\
             - 不適切または不快な表現は絶対に使用しないでください。\n\
             - 専門的で健全な財務アドバイスのみを提供してください。\n\
             - 必ず日本語で回答してください。"
        }
    }
}

fn analysis_template(lang: Language) -> &'static str {
    match lang {
        Language::Ko => {
            "다음 가계부 데이터를 분석하고 JSON 형식으로 응답해주세요:\n\n{data}\n\n\
             [중요] oneLiner는 반드시 다음 스타일로 작성하세요: {one_liner_tone}\n\n\
             아래의 JSON 구조로 응답해주세요:\n\
             {\n\
               \"oneLiner\": \"한 마디 요약 - 위 스타일을 극단적으로 반영한 짧고 강렬한 한 문장\",\n\
               \"summary\": \"전체 재정 상태 요약 (2-3문장)\",\n\
               \"insights\": [\"핵심 인사이트 1\", \"핵심 인사이트 2\", \"핵심 인사이트 3\"],\n\
               \"warnings\": [\"과소비나 우려 사항에 대한 경고\"],\n\
               \"suggestions\": [\"구체적인 개선 제안 1\", \"제안 2\"],\n\
               \"spendingPlan\": \"남은 기간 동안의 구체적인 지출 계획 조언 (예: '남은 15일간 하루 평균 3만원 이내로 지출하면 예산 내 유지 가능합니다. 식비는 2만원, 기타 1만원으로 배분하세요.')\",\n\
               \"pattern\": {\n\
                 \"mainCategory\": \"가장 지출이 많은 카테고리\",\n\
                 \"spendingTrend\": \"increasing/decreasing/stable\",\n\
                 \"savingPotential\": 10000,\n\
                 \"riskLevel\": \"low/medium/high\"\n\
               }\n\
             }"
        }
        Language::En => {
            "Please analyze the following budget data and respond in JSON format:\n\n{data}\n\n\
             [IMPORTANT] The oneLiner MUST be written in this style: {one_liner_tone}\n\n\
             Respond with this exact JSON structure:\n\
             {\n\
               \"oneLiner\": \"One-liner summary - A short, punchy sentence that STRONGLY reflects the above style\",\n\
               \"summary\": \"Overall financial status summary in 2-3 sentences\",\n\
               \"insights\": [\"Key insight 1\", \"Key insight 2\", \"Key insight 3\"],\n\
               \"warnings\": [\"Warning about overspending or concerns\"],\n\
               \"suggestions\": [\"Specific actionable suggestion 1\", \"Suggestion 2\"],\n\
               \"spendingPlan\": \"Specific spending plan advice for the remaining period (e.g., 'For the remaining 15 days, keep daily spending under $30 to stay within budget. Allocate $20 for food and $10 for other expenses.')\",\n\
               \"pattern\": {\n\
                 \"mainCategory\": \"Category with highest spending\",\n\
                 \"spendingTrend\": \"increasing/decreasing/stable\",\n\
                 \"savingPotential\": 10000,\n\
                 \"riskLevel\": \"low/medium/high\"\n\
               }\n\
             }"
        }
        Language::Ja => {
            "以下の家計簿データを分析し、JSON形式で回答してください：\n\n{data}\n\n\
             [重要] oneLinerは必ず次のスタイルで書いてください：{one_liner_tone}\n\n\
             以下のJSON構造で回答してください：\n\
             {\n\
               \"oneLiner\": \"一言まとめ - 上記のスタイルを極端に反映した短くてインパクトのある一文\",\n\
               \"summary\": \"全体的な財務状況の要約（2-3文）\",\n\
               \"insights\": [\"重要な洞察1\", \"重要な洞察2\", \"重要な洞察3\"],\n\
               \"warnings\": [\"過支出や懸念事項についての警告\"],\n\
               \"suggestions\": [\"具体的な改善提案1\", \"提案2\"],\n\
               \"spendingPlan\": \"残りの期間の具体的な支出計画アドバイス（例：'残り15日間、1日平均3万円以内に抑えれば予算内で収まります。食費2万円、その他1万円に配分してください。'）\",\n\
               \"pattern\": {\n\
                 \"mainCategory\": \"最も支出が多いカテゴリー\",\n\
                 \"spendingTrend\": \"increasing/decreasing/stable\",\n\
                 \"savingPotential\": 10000,\n\
                 \"riskLevel\": \"low/medium/high\"\n\
               }\n\
             }"
        }
    }
}

pub fn system_prompt(lang: Language, tone: Tone) -> String {
    system_template(lang).replace("{tone}", tone_description(lang, tone))
}

pub fn analysis_prompt(lang: Language, tone: Tone, filtered_data: &str) -> String {
    analysis_template(lang)
        .replace("{data}", filtered_data)
        .replace("{one_liner_tone}", one_liner_tone(lang, tone))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKey {
    IpRateLimit,
    RateLimit,
    DeviceIdRequired,
    ApiKeyMissing,
    UpstreamError,
    ParseError,
    NetworkError,
}

/// Localized client-facing error template. `{count}` and `{limit}` are
/// substituted by the caller with runtime values.
pub fn error_template(lang: Language, key: ErrorKey) -> &'static str {
    use ErrorKey::*;
    use Language::*;
    match (lang, key) {
        (Ko, IpRateLimit) => "요청이 너무 많습니다. 잠시 후 다시 시도해주세요.",
        (Ko, RateLimit) => "오늘의 분석 횟수({count}/{limit})를 모두 사용했습니다. 내일 다시 시도해주세요.",
        (Ko, DeviceIdRequired) => "유효한 기기 식별자가 필요합니다.",
        (Ko, ApiKeyMissing) => "서버 설정 오류: API 키가 구성되지 않았습니다.",
        (Ko, UpstreamError) => "AI 분석 중 오류가 발생했습니다.",
        (Ko, ParseError) => "AI 응답을 처리하는 중 오류가 발생했습니다.",
        (Ko, NetworkError) => "네트워크 오류가 발생했습니다. 잠시 후 다시 시도해주세요.",
        (En, IpRateLimit) => "Too many requests. Please try again shortly.",
        (En, RateLimit) => "You've used all analysis attempts for today ({count}/{limit}). Please try again tomorrow.",
        (En, DeviceIdRequired) => "A valid device identifier is required.",
        (En, ApiKeyMissing) => "Server configuration error: API key not configured.",
        (En, UpstreamError) => "Error during AI analysis.",
        (En, ParseError) => "Error processing AI response.",
        (En, NetworkError) => "Network error. Please try again shortly.",
        (Ja, IpRateLimit) => "リクエストが多すぎます。しばらくしてからもう一度お試しください。",
        (Ja, RateLimit) => "本日の分析回数({count}/{limit})を使い切りました。明日もう一度お試しください。",
        (Ja, DeviceIdRequired) => "有効なデバイス識別子が必要です。",
        (Ja, ApiKeyMissing) => "サーバー設定エラー：APIキーが設定されていません。",
        (Ja, UpstreamError) => "AI分析中にエラーが発生しました。",
        (Ja, ParseError) => "AI応答の処理中にエラーが発生しました。",
        (Ja, NetworkError) => "ネットワークエラーが発生しました。しばらくしてからもう一度お試しください。",
    }
}

/// Payload for `GET /api/tones`.
pub fn tones_payload() -> Value {
    let mut descriptions = serde_json::Map::new();
    for lang in Language::ALL {
        let mut per_tone = serde_json::Map::new();
        for tone in Tone::ALL {
            per_tone.insert(
                tone.as_str().to_string(),
                Value::String(tone_description(lang, tone).to_string()),
            );
        }
        descriptions.insert(lang.as_str().to_string(), Value::Object(per_tone));
    }
    json!({
        "tones": Tone::ALL.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
        "descriptions": descriptions,
    })
}
