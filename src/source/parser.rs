//! Extracts ranked entries from a marketplace listing page.
//!
//! Container selectors are tried in order; the first one that matches any
//! card wins. Each field has its own fallback list. Cards without an
//! identifier or a title are dropped; a page with no usable cards yields an
//! empty list rather than an error.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::types::ListingEntry;

const CARD_SELECTORS: &[&str] = &["#gridItemRoot", "li.zg-item-immersion", ".zg-grid-general-faceout"];
const IDENTIFIER_SELECTORS: &[&str] = &["[data-asin]"];
const LINK_SELECTORS: &[&str] = &["a[href]"];
const RANK_SELECTORS: &[&str] = &[".zg-bdg-text", ".zg-badge-text"];
const TITLE_SELECTORS: &[&str] = &[
    "[class*='line-clamp']",
    ".p13n-sc-truncate",
    ".p13n-sc-truncated",
    "a.a-link-normal span div",
];
const BRAND_SELECTORS: &[&str] = &[".p13n-sc-byline", "[class*='byline']"];
const IMAGE_SELECTORS: &[&str] = &["img"];
const PRICE_SELECTORS: &[&str] = &["[class*='p13n-sc-price']", ".p13n-sc-price", ".a-price .a-offscreen"];
const RATING_SELECTORS: &[&str] = &[".a-icon-alt", "[class*='a-icon-star']"];
const REVIEW_COUNT_SELECTORS: &[&str] = &[".a-icon-row .a-size-small", "a.a-size-small.a-link-normal"];
const LISTING_DATE_SELECTORS: &[&str] = &[".zg-release-date", "[class*='release-date']"];

pub struct ListingParser {
    cards: Vec<Selector>,
    identifier: Vec<Selector>,
    link: Vec<Selector>,
    rank: Vec<Selector>,
    title: Vec<Selector>,
    brand: Vec<Selector>,
    image: Vec<Selector>,
    price: Vec<Selector>,
    rating: Vec<Selector>,
    review_count: Vec<Selector>,
    listing_date: Vec<Selector>,
}

impl ListingParser {
    pub fn new() -> Self {
        Self {
            cards: compile(CARD_SELECTORS),
            identifier: compile(IDENTIFIER_SELECTORS),
            link: compile(LINK_SELECTORS),
            rank: compile(RANK_SELECTORS),
            title: compile(TITLE_SELECTORS),
            brand: compile(BRAND_SELECTORS),
            image: compile(IMAGE_SELECTORS),
            price: compile(PRICE_SELECTORS),
            rating: compile(RATING_SELECTORS),
            review_count: compile(REVIEW_COUNT_SELECTORS),
            listing_date: compile(LISTING_DATE_SELECTORS),
        }
    }

    /// Parses one page. `rank_offset` is the number of items on earlier pages and
    /// is used only when a card carries no rank badge.
    pub fn parse_page(&self, body: &str, rank_offset: usize) -> Vec<ListingEntry> {
        let html = Html::parse_document(body);

        let Some(cards) = self
            .cards
            .iter()
            .map(|sel| html.select(sel).collect::<Vec<_>>())
            .find(|found| !found.is_empty())
        else {
            debug!("no listing cards matched on page");
            return Vec::new();
        };

        let mut entries = Vec::with_capacity(cards.len());
        for (position, card) in cards.iter().enumerate() {
            let fallback_rank = (rank_offset + position + 1) as i64;
            match self.parse_card(card, fallback_rank) {
                Some(entry) => entries.push(entry),
                None => debug!(position, "skipping card without identifier or title"),
            }
        }
        entries
    }

    fn parse_card(&self, card: &ElementRef<'_>, fallback_rank: i64) -> Option<ListingEntry> {
        let identifier = self.identifier(card)?;

        let title = first_text(card, &self.title).or_else(|| {
            first_attr(card, &self.image, "alt").filter(|alt| !alt.is_empty())
        })?;

        let rank = first_text(card, &self.rank)
            .and_then(|t| parse_rank(&t))
            .unwrap_or(fallback_rank);

        Some(ListingEntry {
            identifier,
            title,
            brand: first_text(card, &self.brand),
            image_url: first_attr(card, &self.image, "src"),
            rank,
            price: first_text(card, &self.price).and_then(|t| parse_price(&t)),
            rating: first_text(card, &self.rating).and_then(|t| parse_rating(&t)),
            review_count: first_text(card, &self.review_count).and_then(|t| parse_count(&t)),
            listing_date: first_text(card, &self.listing_date),
        })
    }

    fn identifier(&self, card: &ElementRef<'_>) -> Option<String> {
        if let Some(id) = card.value().attr("data-asin").map(str::trim).filter(|s| !s.is_empty()) {
            return Some(id.to_string());
        }
        first_attr(card, &self.identifier, "data-asin")
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.link
                    .iter()
                    .flat_map(|sel| card.select(sel))
                    .filter_map(|a| a.value().attr("href"))
                    .find_map(identifier_from_href)
            })
    }
}

impl Default for ListingParser {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(selectors: &[&str]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
}

/// First non-empty, whitespace-collapsed text among the selector matches.
fn first_text(card: &ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        card.select(sel).find_map(|el| {
            let text = el.text().collect::<Vec<_>>().join(" ");
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            (!text.is_empty()).then_some(text)
        })
    })
}

fn first_attr(card: &ElementRef<'_>, selectors: &[Selector], attr: &str) -> Option<String> {
    selectors.iter().find_map(|sel| {
        card.select(sel)
            .find_map(|el| el.value().attr(attr))
            .map(|v| v.trim().to_string())
    })
}

/// `/Some-Title/dp/B0ABCDEF12/ref=...` → `B0ABCDEF12`.
pub fn identifier_from_href(href: &str) -> Option<String> {
    let mut parts = href.split('/');
    parts.find(|p| *p == "dp")?;
    let id = parts.next()?.split(['?', '#']).next()?;
    (id.len() == 10 && id.chars().all(|c| c.is_ascii_alphanumeric())).then(|| id.to_string())
}

/// `#12` → 12. Ranks must be positive.
pub fn parse_rank(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse::<i64>().ok().filter(|r| *r > 0)
}

/// `$1,234.56` → 1234.56. A range (`$12.99 - $19.99`) yields its lower bound.
pub fn parse_price(text: &str) -> Option<f64> {
    let first = text.split(['-', '–']).next()?;
    let cleaned: String = first
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse::<f64>().ok().filter(|p| p.is_finite() && *p >= 0.0)
}

/// `4.5 out of 5 stars` → 4.5.
pub fn parse_rating(text: &str) -> Option<f64> {
    let token = text.split_whitespace().next()?;
    token
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|r| (0.0..=5.0).contains(r))
}

/// `12,345` → 12345.
pub fn parse_count(text: &str) -> Option<i64> {
    let digits: String = text
        .split_whitespace()
        .next()?
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
    <html><body>
      <div class="p13n-gridRow">
        <div id="gridItemRoot">
          <span class="zg-bdg-text">#1</span>
          <div data-asin="B0AAAAAAA1">
            <a class="a-link-normal" href="/Echo-Dot/dp/B0AAAAAAA1/ref=zg_bs_1">
              <img alt="Echo Dot (5th Gen)" src="https://img.example/1.jpg">
            </a>
            <div class="_cDEzb_p13n-sc-css-line-clamp-3_g3dy1">Echo Dot (5th Gen)</div>
            <div class="p13n-sc-byline">Amazon</div>
            <div class="a-icon-row">
              <i class="a-icon-star-small"><span class="a-icon-alt">4.7 out of 5 stars</span></i>
              <span class="a-size-small">123,456</span>
            </div>
            <span class="_cDEzb_p13n-sc-price_3mJ9Z">$49.99</span>
          </div>
        </div>
        <div id="gridItemRoot">
          <span class="zg-bdg-text">#2</span>
          <div data-asin="B0AAAAAAA2">
            <img alt="Fire TV Stick" src="https://img.example/2.jpg">
          </div>
        </div>
        <div id="gridItemRoot">
          <div data-asin="">
            <div class="_cDEzb_p13n-sc-css-line-clamp-3_g3dy1">No identifier here</div>
          </div>
        </div>
        <div id="gridItemRoot">
          <a href="/Kindle/dp/B0AAAAAAA4?th=1">
            <div class="p13n-sc-truncate">Kindle Paperwhite</div>
          </a>
        </div>
      </div>
    </body></html>
    "##;

    #[test]
    fn parses_full_card() {
        let entries = ListingParser::new().parse_page(PAGE, 0);
        let first = &entries[0];
        assert_eq!(first.identifier, "B0AAAAAAA1");
        assert_eq!(first.title, "Echo Dot (5th Gen)");
        assert_eq!(first.brand.as_deref(), Some("Amazon"));
        assert_eq!(first.image_url.as_deref(), Some("https://img.example/1.jpg"));
        assert_eq!(first.rank, 1);
        assert_eq!(first.price, Some(49.99));
        assert_eq!(first.rating, Some(4.7));
        assert_eq!(first.review_count, Some(123_456));
    }

    #[test]
    fn sparse_card_keeps_optionals_empty() {
        let entries = ListingParser::new().parse_page(PAGE, 0);
        let second = &entries[1];
        assert_eq!(second.identifier, "B0AAAAAAA2");
        assert_eq!(second.title, "Fire TV Stick");
        assert_eq!(second.rank, 2);
        assert_eq!(second.price, None);
        assert_eq!(second.rating, None);
        assert_eq!(second.review_count, None);
    }

    #[test]
    fn skips_cards_without_identifier_and_falls_back_to_position_rank() {
        let entries = ListingParser::new().parse_page(PAGE, 50);
        let ids: Vec<_> = entries.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(ids, vec!["B0AAAAAAA1", "B0AAAAAAA2", "B0AAAAAAA4"]);
        // fourth card on a second page with no badge
        assert_eq!(entries[2].rank, 54);
        assert_eq!(entries[2].title, "Kindle Paperwhite");
    }

    #[test]
    fn href_fallback_skips_links_without_product_path() {
        let page = r#"
        <div id="gridItemRoot">
          <a href="/gp/help/customer">Help</a>
          <a href="/Kindle-Scribe/dp/B0BBBBBBB1/ref=zg_bs_3">
            <div class="p13n-sc-truncate">Kindle Scribe</div>
          </a>
        </div>
        <div id="gridItemRoot">
          <a href="/gp/help/customer">
            <div class="p13n-sc-truncate">Help only</div>
          </a>
        </div>
        "#;
        let parser = ListingParser::new();
        for _ in 0..2 {
            let entries = parser.parse_page(page, 0);
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].identifier, "B0BBBBBBB1");
            assert_eq!(entries[0].rank, 1);
        }
    }

    #[test]
    fn unrecognized_markup_yields_empty_list() {
        let entries = ListingParser::new().parse_page("<html><body><p>Sorry</p></body></html>", 0);
        assert!(entries.is_empty());
    }

    #[test]
    fn field_parsers() {
        assert_eq!(parse_rank("#17"), Some(17));
        assert_eq!(parse_rank("#0"), None);
        assert_eq!(parse_price("$1,234.56"), Some(1234.56));
        assert_eq!(parse_price("$12.99 - $19.99"), Some(12.99));
        assert_eq!(parse_price("Currently unavailable"), None);
        assert_eq!(parse_rating("4.5 out of 5 stars"), Some(4.5));
        assert_eq!(parse_rating("stars"), None);
        assert_eq!(parse_count("12,345"), Some(12_345));
        assert_eq!(identifier_from_href("/x/dp/B0CX23V2ZK/ref=zg"), Some("B0CX23V2ZK".to_string()));
        assert_eq!(identifier_from_href("/gp/help"), None);
    }
}
