use crate::{
    model::{BusinessInfo, DirectoryEntry},
    policy::{self, Viewer},
};

/// Narrows the member directory. Empty criteria match everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryFilter {
    pub name: String,
    pub bio_keyword: String,
    pub with_social_links: bool,
}

impl DirectoryFilter {
    pub fn is_active(&self) -> bool {
        !self.name.trim().is_empty() || !self.bio_keyword.trim().is_empty() || self.with_social_links
    }

    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        let profile = &entry.profile;
        contains(&profile.display_name, &self.name)
            && contains(&profile.bio, &self.bio_keyword)
            && (!self.with_social_links || !profile.social_links.is_empty())
    }

    pub fn apply<'a>(&self, entries: &'a [DirectoryEntry]) -> Vec<&'a DirectoryEntry> {
        entries.iter().filter(|entry| self.matches(entry)).collect()
    }
}

fn contains(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim();
    needle.is_empty() || haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// The entry as this viewer may see it.
pub fn visible_to(entry: &DirectoryEntry, viewer: &Viewer) -> DirectoryEntry {
    let mut entry = entry.clone();
    if !policy::can_view_business_fields(viewer, &entry.identity, entry.profile.visibility) {
        entry.profile.business = BusinessInfo::default();
    }
    entry
}

/// Filters, then redacts, the directory for one viewer.
pub fn render_directory(entries: &[DirectoryEntry], filter: &DirectoryFilter, viewer: &Viewer) -> Vec<DirectoryEntry> {
    filter
        .apply(entries)
        .into_iter()
        .map(|entry| visible_to(entry, viewer))
        .collect()
}
