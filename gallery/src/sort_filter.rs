//! Pure projection of the authoritative list into what the grid shows.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use sync::MediaItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortBy {
    #[default]
    Newest,
    Oldest,
    MostLikes,
    ByUser,
}

impl FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "newest" => Ok(SortBy::Newest),
            "oldest" => Ok(SortBy::Oldest),
            "most-likes" => Ok(SortBy::MostLikes),
            "by-user" => Ok(SortBy::ByUser),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SortBy::Newest => "newest",
            SortBy::Oldest => "oldest",
            SortBy::MostLikes => "most-likes",
            SortBy::ByUser => "by-user",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewState {
    pub sort_by: SortBy,
    pub only_mine: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserGroup {
    pub user_id: String,
    pub display_name: String,
    pub items: Vec<MediaItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Projection {
    Flat(Vec<MediaItem>),
    Grouped(Vec<UserGroup>),
}

impl Projection {
    pub fn len(&self) -> usize {
        match self {
            Projection::Flat(items) => items.len(),
            Projection::Grouped(groups) => groups.iter().map(|g| g.items.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items in display order, groups flattened.
    pub fn items(&self) -> Vec<&MediaItem> {
        match self {
            Projection::Flat(items) => items.iter().collect(),
            Projection::Grouped(groups) => groups.iter().flat_map(|g| g.items.iter()).collect(),
        }
    }
}

/// Apply the filter then the sort. `principal_id` of `None` with
/// `only_mine` set yields nothing.
pub fn project(items: &[MediaItem], view: &ViewState, principal_id: Option<&str>) -> Projection {
    let mut visible: Vec<MediaItem> = items
        .iter()
        .filter(|item| !view.only_mine || Some(item.user_id.as_str()) == principal_id)
        .cloned()
        .collect();

    match view.sort_by {
        SortBy::Newest => {
            visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Projection::Flat(visible)
        }
        SortBy::Oldest => {
            visible.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Projection::Flat(visible)
        }
        SortBy::MostLikes => {
            visible.sort_by(|a, b| {
                b.likes_count
                    .cmp(&a.likes_count)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            });
            Projection::Flat(visible)
        }
        SortBy::ByUser => Projection::Grouped(group_by_user(visible)),
    }
}

fn group_by_user(items: Vec<MediaItem>) -> Vec<UserGroup> {
    let mut groups: Vec<UserGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for item in items {
        let slot = *index.entry(item.user_id.clone()).or_insert_with(|| {
            groups.push(UserGroup {
                user_id: item.user_id.clone(),
                display_name: item.display_name.clone(),
                items: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].items.push(item);
    }
    for group in &mut groups {
        group.items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
    groups
}
