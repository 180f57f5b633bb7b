use crate::core::Category;

/// Picks a category for a transaction by plain name matching.
///
/// Names are compared normalized (lowercase, anything but ASCII letters and
/// digits turned into spaces, whitespace collapsed). The first category whose
/// name contains, or is contained in, the transaction name wins.
pub struct CategoryMatcher<'a> {
    categories: Vec<(&'a Category, String)>,
}

impl<'a> CategoryMatcher<'a> {
    pub fn new(categories: &'a [Category]) -> Self {
        Self {
            categories: categories
                .iter()
                .map(|c| (c, normalize(&c.name)))
                .filter(|(_, name)| !name.is_empty())
                .collect(),
        }
    }

    pub fn find(&self, transaction_name: &str) -> Option<&'a Category> {
        let name = normalize(transaction_name);
        if name.is_empty() {
            return None;
        }

        self.categories
            .iter()
            .find(|(_, category)| name.contains(category.as_str()) || category.contains(name.as_str()))
            .map(|(c, _)| *c)
    }
}

fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
