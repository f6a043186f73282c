use phf::phf_map;
use time::Date;
use unicode_normalization::UnicodeNormalization;

const SEPARATOR: char = '-';

static ND_CHARMAP: phf::Map<char, &'static str> = phf_map! {
    'Æ' => "AE",
    'æ' => "ae",
    'Ð' => "D",
    'ð' => "d",
    'Ø' => "O",
    'ø' => "o",
    'Þ' => "Th",
    'þ' => "th",
    'ß' => "ss",
    'Đ' => "D",
    'đ' => "d",
    'Ħ' => "H",
    'ħ' => "h",
    'ı' => "i",
    'ĸ' => "k",
    'Ł' => "L",
    'ł' => "l",
    'Ŋ' => "N",
    'ŋ' => "n",
    'Œ' => "Oe",
    'œ' => "oe",
    'Ŧ' => "T",
    'ŧ' => "t",
};

fn remove_diacritics(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for c in text.nfkd() {
        if let Some(mapped) = ND_CHARMAP.get(&c) {
            result.push_str(mapped);
        } else if c.is_ascii() {
            result.push(c);
        } else if c.is_alphabetic() {
            result.push(' ');
        }
    }

    result
}

/// Lowercase ASCII form of `text`, words joined by single `-`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_separator = false;

    for c in remove_diacritics(text).chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push(SEPARATOR);
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    slug
}

fn date_part(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Base slug of a movie, title followed by the full release date.
///
/// Remakes sharing a title get distinct slugs. Titles differing only in
/// case or in non-Latin letters share one, the caller adds a discriminator.
/// Expects a four-digit year.
pub fn generate_slug(title: &str, release_date: Date) -> String {
    let title = slugify(title);
    let date = date_part(release_date);
    if title.is_empty() {
        date
    } else {
        format!("{title}{SEPARATOR}{date}")
    }
}
