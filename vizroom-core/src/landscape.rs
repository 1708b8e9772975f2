//! Structure index of the visualized landscape.
//!
//! Parsing the landscape structure is done elsewhere; this index only keeps
//! the ids needed to decide whether a referenced entity still exists.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entity::{EntityReference, EntityType};

/// Entity ids of one application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationModel {
    pub id: String,
    pub name: String,
    /// Root component of the application's tree.
    pub foundation_id: String,
    pub components: BTreeSet<String>,
    pub classes: BTreeSet<String>,
    pub communications: BTreeSet<String>,
}

impl ApplicationModel {
    pub fn new(id: impl Into<String>, foundation_id: impl Into<String>) -> Self {
        let id = id.into();
        let foundation_id = foundation_id.into();
        let mut components = BTreeSet::new();
        components.insert(foundation_id.clone());
        Self {
            name: id.clone(),
            id,
            foundation_id,
            components,
            classes: BTreeSet::new(),
            communications: BTreeSet::new(),
        }
    }

    pub fn with_components<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.components.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_classes<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classes.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_communications<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.communications.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn contains(&self, entity_type: EntityType, entity_id: &str) -> bool {
        match entity_type {
            EntityType::Component => self.components.contains(entity_id),
            EntityType::Clazz => self.classes.contains(entity_id),
            EntityType::ClassCommunication => self.communications.contains(entity_id),
            EntityType::ExternCommunication => false,
        }
    }
}

/// All applications and inter-application links of a landscape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Landscape {
    pub token: String,
    pub applications: BTreeMap<String, ApplicationModel>,
    pub extern_communications: BTreeSet<String>,
}

impl Landscape {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn with_application(mut self, app: ApplicationModel) -> Self {
        self.applications.insert(app.id.clone(), app);
        self
    }

    pub fn with_extern_communications<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extern_communications.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn application(&self, app_id: &str) -> Option<&ApplicationModel> {
        self.applications.get(app_id)
    }

    /// Whether the referenced entity exists in this landscape.
    pub fn contains(&self, entity: &EntityReference) -> bool {
        if entity.entity_type == EntityType::ExternCommunication {
            return self.extern_communications.contains(&entity.entity_id);
        }
        match &entity.app_id {
            Some(app_id) => self
                .applications
                .get(app_id)
                .is_some_and(|a| a.contains(entity.entity_type, &entity.entity_id)),
            None => self
                .applications
                .values()
                .any(|a| a.contains(entity.entity_type, &entity.entity_id)),
        }
    }

    /// Application containing an app-scoped entity, searching only `candidates`.
    pub fn owning_application<'a, I>(&self, entity_type: EntityType, entity_id: &str, candidates: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        candidates
            .into_iter()
            .find(|app_id| {
                self.applications
                    .get(app_id.as_str())
                    .is_some_and(|a| a.contains(entity_type, entity_id))
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Landscape {
        Landscape::new("tok")
            .with_application(
                ApplicationModel::new("shop", "shop-root")
                    .with_components(["shop.api"])
                    .with_classes(["Cart"])
                    .with_communications(["Cart->Api"]),
            )
            .with_extern_communications(["shop=>billing"])
    }

    #[test]
    fn test_foundation_is_a_component() {
        let l = sample();
        assert!(l.contains(&EntityReference::in_app("shop", EntityType::Component, "shop-root")));
    }

    #[test]
    fn test_contains_scoped_and_global() {
        let l = sample();
        assert!(l.contains(&EntityReference::in_app("shop", EntityType::Clazz, "Cart")));
        assert!(!l.contains(&EntityReference::in_app("billing", EntityType::Clazz, "Cart")));
        assert!(l.contains(&EntityReference::extern_link("shop=>billing")));
        assert!(!l.contains(&EntityReference::extern_link("nope")));
    }

    #[test]
    fn test_owning_application_respects_candidates() {
        let l = sample();
        let open = vec!["shop".to_string()];
        assert_eq!(
            l.owning_application(EntityType::Clazz, "Cart", &open),
            Some("shop".to_string())
        );
        let none: Vec<String> = Vec::new();
        assert_eq!(l.owning_application(EntityType::Clazz, "Cart", &none), None);
    }
}
