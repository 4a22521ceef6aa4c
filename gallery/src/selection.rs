/// Photos marked for bulk deletion while selection mode is on.
#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    active: bool,
    ids: Vec<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self) {
        self.active = true;
    }

    /// Leave selection mode, dropping whatever was selected.
    pub fn exit(&mut self) {
        self.active = false;
        self.ids.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Flip `media_id` in or out of the selection. Ignored outside
    /// selection mode. Returns whether the id is now selected.
    pub fn toggle(&mut self, media_id: &str) -> bool {
        if !self.active {
            return false;
        }
        if let Some(pos) = self.ids.iter().position(|id| id == media_id) {
            self.ids.remove(pos);
            false
        } else {
            self.ids.push(media_id.to_string());
            true
        }
    }

    pub fn contains(&self, media_id: &str) -> bool {
        self.ids.iter().any(|id| id == media_id)
    }

    /// Selected ids in the order they were picked.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}
