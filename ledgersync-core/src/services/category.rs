//! Category mapping - aggregator taxonomy to ledger categories
//!
//! Lookup order: exact match on the aggregator category, then a whole-word
//! match on the subcategory, then keyword rules on the description. Anything
//! left over is `Other`. Income transactions are always `Income`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{Category, EntryType};

/// Aggregator category names (lowercase) with a direct ledger equivalent
const CATEGORY_TABLE: &[(&str, Category)] = &[
    ("food & groceries", Category::Groceries),
    ("groceries", Category::Groceries),
    ("food & dining", Category::FoodAndDining),
    ("restaurants", Category::FoodAndDining),
    ("transport & travel", Category::Transportation),
    ("transportation", Category::Transportation),
    ("travel", Category::Travel),
    ("personal shopping", Category::Shopping),
    ("shopping", Category::Shopping),
    ("online platforms & leisure", Category::Entertainment),
    ("entertainment", Category::Entertainment),
    ("bills & utilities", Category::BillsAndUtilities),
    ("utilities", Category::BillsAndUtilities),
    ("wellness & health", Category::Healthcare),
    ("health", Category::Healthcare),
    ("home & life", Category::Housing),
    ("housing", Category::Housing),
    ("education", Category::Education),
    ("subscriptions & memberships", Category::Subscriptions),
    ("subscriptions", Category::Subscriptions),
    ("transfers", Category::Transfers),
    ("withdrawal & atm", Category::Transfers),
    ("taxes", Category::Taxes),
    ("income & payments", Category::Income),
    ("income", Category::Income),
];

/// Subcategory words, checked in order
///
/// A hint matches a whole word, optionally plural; a trailing `*` marks a
/// stem that matches any word it starts.
const SUBCATEGORY_HINTS: &[(&str, Category)] = &[
    ("restaurant", Category::FoodAndDining),
    ("coffee", Category::FoodAndDining),
    ("fast food", Category::FoodAndDining),
    ("supermarket", Category::Groceries),
    ("grocer*", Category::Groceries),
    ("convenience", Category::Groceries),
    ("taxi", Category::Transportation),
    ("fuel", Category::Transportation),
    ("gas station", Category::Transportation),
    ("parking", Category::Transportation),
    ("public transport*", Category::Transportation),
    ("streaming", Category::Subscriptions),
    ("membership", Category::Subscriptions),
    ("electric*", Category::BillsAndUtilities),
    ("water", Category::BillsAndUtilities),
    ("internet", Category::BillsAndUtilities),
    ("phone", Category::BillsAndUtilities),
    ("pharmac*", Category::Healthcare),
    ("doctor", Category::Healthcare),
    ("hospital", Category::Healthcare),
    ("rent", Category::Housing),
    ("mortgage", Category::Housing),
    ("hotel", Category::Travel),
    ("airline", Category::Travel),
    ("flight", Category::Travel),
    ("tuition", Category::Education),
    ("school", Category::Education),
    ("cinema", Category::Entertainment),
    ("concert", Category::Entertainment),
    ("clothing", Category::Shopping),
    ("electronics", Category::Shopping),
    ("taxes", Category::Taxes),
    ("tax", Category::Taxes),
    ("transfer", Category::Transfers),
];

static SUBCATEGORY_RULES: Lazy<Vec<(Regex, Category)>> = Lazy::new(|| {
    SUBCATEGORY_HINTS
        .iter()
        .map(|(hint, category)| {
            let pattern = match hint.strip_suffix('*') {
                Some(stem) => format!(r"(?i)\b{}\w*", regex::escape(stem)),
                None => format!(r"(?i)\b{}s?\b", regex::escape(hint)),
            };
            (Regex::new(&pattern).unwrap(), *category)
        })
        .collect()
});

static DESCRIPTION_RULES: Lazy<Vec<(Regex, Category)>> = Lazy::new(|| {
    [
        (r"(?i)\b(uber|didi|cabify|lyft|pemex|shell|metro|toll)\b", Category::Transportation),
        (r"(?i)\b(netflix|spotify|disney|hbo|youtube premium|prime video)\b", Category::Subscriptions),
        (r"(?i)\b(walmart|soriana|chedraui|carrefour|costco|oxxo|supermercado)\b", Category::Groceries),
        (r"(?i)\b(starbucks|mcdonald'?s|restaurante?|cafe|pizza|burger)\b", Category::FoodAndDining),
        (r"(?i)\b(amazon|mercado ?libre|liverpool|zara)\b", Category::Shopping),
        (r"(?i)\b(cfe|telmex|izzi|totalplay|telcel|luz|agua)\b", Category::BillsAndUtilities),
        (r"(?i)\b(farmacia|pharmacy|hospital|clinic)\b", Category::Healthcare),
        (r"(?i)\b(renta|rent|hipoteca|mortgage)\b", Category::Housing),
        (r"(?i)\b(aeromexico|volaris|vivaaerobus|airbnb|hotel|booking\.com)\b", Category::Travel),
        (r"(?i)\b(sat|impuesto|tax)\b", Category::Taxes),
        (r"(?i)\b(spei|transferencia|transfer)\b", Category::Transfers),
        (r"(?i)\b(cinepolis|cinemex|ticketmaster|steam)\b", Category::Entertainment),
        (r"(?i)\b(colegiatura|universidad|tuition|udemy|coursera)\b", Category::Education),
    ]
    .into_iter()
    .map(|(pattern, category)| (Regex::new(pattern).unwrap(), category))
    .collect()
});

/// Maps aggregator categories onto the ledger's fixed category set
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryMapper;

impl CategoryMapper {
    pub fn new() -> Self {
        Self
    }

    pub fn map(
        &self,
        entry_type: EntryType,
        category: Option<&str>,
        subcategory: Option<&str>,
        description: Option<&str>,
    ) -> Category {
        if entry_type == EntryType::Income {
            return Category::Income;
        }

        if let Some(raw) = category.map(|c| c.trim().to_lowercase()) {
            if let Some((_, mapped)) = CATEGORY_TABLE.iter().find(|(name, _)| *name == raw) {
                // an outflow tagged as income is still an expense
                if *mapped != Category::Income {
                    return *mapped;
                }
            }
        }

        if let Some(sub) = subcategory {
            if let Some((_, mapped)) = SUBCATEGORY_RULES.iter().find(|(re, _)| re.is_match(sub)) {
                return *mapped;
            }
        }

        if let Some(text) = description {
            if let Some((_, mapped)) = DESCRIPTION_RULES.iter().find(|(re, _)| re.is_match(text)) {
                return *mapped;
            }
        }

        Category::Other
    }
}
