use crate::{
    discord::{Embed, EmbedAuthor, EmbedField, EmbedFooter, EmbedImage},
    enrich::format_created_at,
    format::format_text,
    sources::{
        post::{permalink, MatchedTweet},
        PostData, PostType,
    },
};

/// Discord shows at most four images per gallery.
pub const MAX_IMAGES: usize = 4;
pub const DEFAULT_MISSING_REFERENCE_TEXT: &str = "This tweet was deleted by the original poster.";
const DEFAULT_ICON: &str = "https://abs.twimg.com/icons/apple-touch-icon-192x192.png";

const COLOR_TWEET: u32 = 0x1d9bf0;
const COLOR_RETWEET: u32 = 0x17bf63;
const COLOR_QUOTE: u32 = 0xffad1f;
const COLOR_REPLY: u32 = 0x794bc4;
const COLOR_UNAVAILABLE: u32 = 0x657786;

// Discord embed limits, in characters.
const TITLE_LIMIT: usize = 256;
const DESCRIPTION_LIMIT: usize = 4096;
const FIELD_NAME_LIMIT: usize = 256;
const FIELD_VALUE_LIMIT: usize = 1024;
const FOOTER_LIMIT: usize = 2048;

/// The tweet kinds that can be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Normal,
    Repost,
    Quote,
    Reply,
}

impl TryFrom<PostType> for MessageKind {
    type Error = PostType;

    fn try_from(value: PostType) -> Result<Self, Self::Error> {
        match value {
            PostType::Normal => Ok(Self::Normal),
            PostType::Repost => Ok(Self::Repost),
            PostType::Quote => Ok(Self::Quote),
            PostType::Reply => Ok(Self::Reply),
            PostType::Unknown => Err(value),
        }
    }
}

impl MessageKind {
    fn color(self) -> u32 {
        match self {
            Self::Normal => COLOR_TWEET,
            Self::Repost => COLOR_RETWEET,
            Self::Quote => COLOR_QUOTE,
            Self::Reply => COLOR_REPLY,
        }
    }
}

/// Renders a tweet (and the tweet it points to) as webhook embeds.
pub struct MessageBuilder<'a> {
    kind: MessageKind,
    primary: &'a PostData,
    reference: Option<&'a PostData>,
    missing_reference_text: &'a str,
}

impl<'a> MessageBuilder<'a> {
    pub fn new(kind: MessageKind, primary: &'a PostData) -> Self {
        Self {
            kind,
            primary,
            reference: None,
            missing_reference_text: DEFAULT_MISSING_REFERENCE_TEXT,
        }
    }

    /// `None` means the referenced tweet could not be fetched.
    pub fn reference(mut self, reference: Option<&'a PostData>) -> Self {
        self.reference = reference;

        self
    }

    pub fn missing_reference_text(mut self, text: &'a str) -> Self {
        self.missing_reference_text = text;

        self
    }

    /// Returns 1 to [`MAX_IMAGES`] embeds, to be sent together.
    pub fn build(self) -> Vec<Embed> {
        let primary = self.primary;
        let author = match self.kind {
            MessageKind::Normal | MessageKind::Quote => primary.author_label(),
            MessageKind::Repost => format!("🔁 {} retweeted", primary.author_label()),
            MessageKind::Reply => format!("↪️ {} replied", primary.author_label()),
        };
        let description = match self.kind {
            MessageKind::Repost => None,
            _ => non_empty(truncate(
                format_text(&primary.text, false),
                DESCRIPTION_LIMIT,
            )),
        };
        let fields = match self.kind {
            MessageKind::Normal => Vec::new(),
            _ => vec![self.reference_field()],
        };

        let mut embeds = vec![Embed {
            url: Some(primary.url.clone()),
            color: Some(self.kind.color()),
            author: Some(EmbedAuthor {
                name: truncate(author, TITLE_LIMIT),
                url: primary.profile_url(),
                icon_url: primary.author_image_url.clone(),
            }),
            description,
            fields,
            footer: Some(footer(&primary.created_at, primary.author_image_url.as_deref())),
            ..Default::default()
        }];

        let media: &[String] = match self.kind {
            MessageKind::Repost => self.reference.map_or(&[][..], |r| r.media_urls.as_slice()),
            _ => &primary.media_urls,
        };
        attach_media(&mut embeds, media, &primary.url);

        embeds
    }

    fn reference_field(&self) -> EmbedField {
        match self.reference {
            Some(reference) => EmbedField {
                name: truncate(reference.author_label(), FIELD_NAME_LIMIT),
                value: truncate(format_text(&reference.text, true), FIELD_VALUE_LIMIT),
                inline: false,
            },
            None => EmbedField {
                name: "Original tweet".to_owned(),
                value: truncate(self.missing_reference_text.to_owned(), FIELD_VALUE_LIMIT),
                inline: false,
            },
        }
    }
}

/// Notice for a match whose tweet was gone by the time we looked it up.
pub fn unavailable_notice(tweet: &MatchedTweet) -> Vec<Embed> {
    vec![Embed {
        title: Some("Tweet no longer available".to_owned()),
        description: non_empty(truncate(format_text(&tweet.text, false), DESCRIPTION_LIMIT)),
        url: Some(permalink(None, &tweet.id)),
        color: Some(COLOR_UNAVAILABLE),
        footer: Some(footer(
            &format_created_at(tweet.created_at.as_deref()),
            None,
        )),
        ..Default::default()
    }]
}

/// First image goes on the existing embed, every further one gets its own
/// embed with the same url so Discord groups them. Extra images are dropped.
fn attach_media(embeds: &mut Vec<Embed>, media: &[String], url: &str) {
    let mut images = media.iter().take(MAX_IMAGES);

    let Some(first) = images.next() else {
        return;
    };
    if let Some(main) = embeds.first_mut() {
        main.image = Some(EmbedImage { url: first.clone() });
    }

    embeds.extend(images.map(|image| Embed {
        url: Some(url.to_owned()),
        image: Some(EmbedImage { url: image.clone() }),
        ..Default::default()
    }));
}

fn footer(created_at: &str, icon: Option<&str>) -> EmbedFooter {
    EmbedFooter {
        text: truncate(created_at.to_owned(), FOOTER_LIMIT),
        icon_url: Some(icon.unwrap_or(DEFAULT_ICON).to_owned()),
    }
}

fn truncate(text: String, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text;
    }

    let mut out: String = text.chars().take(limit - 1).collect();
    out.push('…');
    out
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}
