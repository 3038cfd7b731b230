//! Coffee shop menu
//!
//! Drinks and modifiers grouped by category, plus the derived tables the
//! tools and the system prompt need.

use lazy_static::lazy_static;
use serde_json::json;

/// Drink categories, in display order.
pub const DRINKS: &[(&str, &[&str])] = &[
    ("Coffee Drinks", &["Espresso", "Americano", "Cold Brew"]),
    (
        "Coffee Drinks with Milk",
        &["Latte", "Cappuccino", "Cortado", "Macchiato", "Mocha", "Flat White"],
    ),
    ("Tea Drinks", &["English Breakfast Tea", "Green Tea", "Earl Grey"]),
    ("Tea Drinks with Milk", &["Chai Latte", "Matcha Latte", "London Fog"]),
    ("Other Drinks", &["Steamer", "Hot Chocolate"]),
];

/// Modifier categories, in display order.
pub const MODIFIERS: &[(&str, &[&str])] = &[
    ("Milk options", &["Whole", "2%", "Oat", "Almond", "Soy", "2% Lactose Free"]),
    (
        "Espresso shots",
        &["Single shot", "Double shots", "Triple shots", "Quadruple shots"],
    ),
    ("Caffeine", &["Decaf", "Regular"]),
    ("Hot-Iced", &["Hot", "Iced"]),
    (
        "Sweeteners",
        &[
            "vanilla sweetener",
            "hazelnut sweetener",
            "caramel sauce",
            "chocolate sauce",
            "sugar free vanilla sweetener",
            "sugar",
        ],
    ),
    ("Additions", &["whipped cream"]),
];

const DEFAULT_MODIFIERS: &[(&str, &str)] = &[
    ("milk", "Whole"),
    ("shots", "Double"),
    ("caffeine", "Regular"),
    ("hotIced", "Hot"),
    ("sweeteners", ""),
];

const MENU_RULES: &str = r#"Only one milk can be added to a drink.
Milk cannot be added to 'coffee drinks'.
One or more sweeteners can be added to a drink.
One or more special requests can be added as modifiers: any reasonable modification that does not involve items not on the menu, for example 'extra hot', 'one pump', 'half caff' or 'extra foam'.
'dirty' means adding a shot of espresso to a drink that does not usually have one, like 'Dirty Chai Latte'.
'Regular milk' is the same as 'whole milk'.
'Sweetened' means regular sugar, not a specific sweetener or sauce."#;

lazy_static! {
    /// Every drink on the menu, flattened across categories.
    pub static ref ALL_BEVERAGES: Vec<&'static str> = DRINKS
        .iter()
        .flat_map(|(_, drinks)| drinks.iter().copied())
        .collect();

    /// Menu description embedded in the system instructions.
    pub static ref MENU_TEXT: String = build_menu_text();
}

fn category_map(categories: &[(&str, &[&str])]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (category, items) in categories {
        map.insert(category.to_string(), json!(items));
    }
    serde_json::Value::Object(map)
}

fn build_menu_text() -> String {
    let defaults: serde_json::Map<String, serde_json::Value> = DEFAULT_MODIFIERS
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();

    format!(
        "{}\n\nModifiers:\n{}\n\n{}\n\nDefault modifiers:\n{}",
        json!({ "drinks": category_map(DRINKS) }),
        json!({ "modifiers": category_map(MODIFIERS) }),
        MENU_RULES,
        serde_json::Value::Object(defaults),
    )
}

/// Exact, case-sensitive menu lookup; tool arguments are constrained to the
/// enumerated names.
pub fn is_on_menu(drink: &str) -> bool {
    ALL_BEVERAGES.iter().any(|name| *name == drink)
}

/// File-name slug for a drink's image, e.g. `Chai Latte` -> `chai-latte`.
pub fn image_slug(drink: &str) -> String {
    drink
        .split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_beverages_flattened() {
        assert_eq!(ALL_BEVERAGES.len(), 17);
        assert!(is_on_menu("Latte"));
        assert!(is_on_menu("London Fog"));
        assert!(!is_on_menu("latte"));
        assert!(!is_on_menu("Frappuccino"));
    }

    #[test]
    fn test_menu_text_lists_drinks_and_rules() {
        assert!(MENU_TEXT.contains("Cold Brew"));
        assert!(MENU_TEXT.contains("Only one milk"));
        assert!(MENU_TEXT.contains("Default modifiers"));
    }

    #[test]
    fn test_image_slug() {
        assert_eq!(image_slug("English Breakfast Tea"), "english-breakfast-tea");
    }
}
