/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The stateful zone grid.

use crate::types::data_types::{Address, ClientId, Point, SuperpeerId, ZoneId};

use super::types::{
    GridChange, LeafView, Rect, SplitOrientation, SuperpeerSlot, Zone, ZoneGridConfiguration,
    ZoneGridError, ZoneGridSnapshot, ZoneGridView,
};

/// Arena of every zone ever created, indexed by [`ZoneId`].
///
/// Zones are only appended; a zone's id is its index in the arena and the root is always at index 0.
#[derive(Clone, Debug)]
pub struct ZoneGrid {
    config: ZoneGridConfiguration,
    zones: Vec<Zone>,
    next_superpeer_id: u64,
    zone_info_last_modified: u64,
}

impl ZoneGrid {
    /// Create a grid with a single leaf, the root, spanning the whole world.
    pub fn new(config: ZoneGridConfiguration) -> Self {
        let root = Zone::leaf(
            ZoneId::root(),
            None,
            Rect::new(0, 0, config.world_width, config.world_height),
        );
        Self {
            config,
            zones: vec![root],
            next_superpeer_id: 0,
            zone_info_last_modified: 0,
        }
    }

    /// Rebuild a grid from a replicated snapshot. An empty snapshot yields a fresh grid.
    pub fn from_snapshot(config: ZoneGridConfiguration, snapshot: ZoneGridSnapshot) -> Self {
        if snapshot.zones.is_empty() {
            return Self::new(config);
        }
        Self {
            config,
            zones: snapshot.zones,
            next_superpeer_id: snapshot.next_superpeer_id,
            zone_info_last_modified: snapshot.zone_info_last_modified,
        }
    }

    pub fn snapshot(&self) -> ZoneGridSnapshot {
        ZoneGridSnapshot {
            zones: self.zones.clone(),
            next_superpeer_id: self.next_superpeer_id,
            zone_info_last_modified: self.zone_info_last_modified,
        }
    }

    /// The client-facing view: every current leaf with its superpeers.
    pub fn view(&self) -> ZoneGridView {
        ZoneGridView {
            zone_info_last_modified: self.zone_info_last_modified,
            leaves: self
                .leaves()
                .map(|zone| LeafView {
                    id: zone.id,
                    rect: zone.rect,
                    superpeers: zone.superpeers.clone(),
                })
                .collect(),
        }
    }

    pub fn configuration(&self) -> &ZoneGridConfiguration {
        &self.config
    }

    /// Replace the runtime-tunable parameters. The world dimensions of the existing root are kept.
    pub fn reconfigure(&mut self, config: ZoneGridConfiguration) {
        self.config = ZoneGridConfiguration {
            world_width: self.config.world_width,
            world_height: self.config.world_height,
            ..config
        };
    }

    /// Counter bumped by every split, merge, superpeer assignment and superpeer removal.
    pub fn zone_info_last_modified(&self) -> u64 {
        self.zone_info_last_modified
    }

    pub fn root(&self) -> &Zone {
        &self.zones[ZoneId::root().index()]
    }

    pub fn zone(&self, zone: ZoneId) -> Option<&Zone> {
        self.zones.get(zone.index())
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Every current leaf, in id order.
    pub fn leaves(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter().filter(|zone| zone.is_current_leaf())
    }

    pub fn superpeer_slot(&self, zone: ZoneId, superpeer: SuperpeerId) -> Option<&SuperpeerSlot> {
        self.zone(zone)
            .filter(|zone| zone.is_current_leaf())
            .and_then(|zone| zone.superpeer(superpeer))
    }

    fn current_leaf(&self, zone: ZoneId) -> Result<&Zone, ZoneGridError> {
        self.zones
            .get(zone.index())
            .filter(|z| z.is_current_leaf())
            .ok_or(ZoneGridError::UnknownZone { zone })
    }

    fn current_leaf_mut(&mut self, zone: ZoneId) -> Result<&mut Zone, ZoneGridError> {
        self.zones
            .get_mut(zone.index())
            .filter(|z| z.is_current_leaf())
            .ok_or(ZoneGridError::UnknownZone { zone })
    }

    fn bump(&mut self) {
        self.zone_info_last_modified += 1;
    }
}

/// Population and structural changes.
impl ZoneGrid {
    pub fn record_population(&mut self, zone: ZoneId, count: u32) -> Result<(), ZoneGridError> {
        self.current_leaf_mut(zone)?.population = count;
        Ok(())
    }

    /// Split every overpopulated leaf, then merge every underpopulated sibling pair.
    ///
    /// Only the leaves that exist when the pass starts are considered, so a zone created by a split in
    /// this pass is never merged in the same pass. Overpopulated leaves that cannot be split without
    /// violating the minimum dimensions are left as they are.
    pub fn evaluate(&mut self) -> Vec<GridChange> {
        let leaves: Vec<ZoneId> = self.leaves().map(|zone| zone.id).collect();
        let mut changes = Vec::new();

        for &zone in &leaves {
            if self.zones[zone.index()].population < self.config.overpopulation_threshold {
                continue;
            }
            if let Ok(children) = self.split(zone) {
                changes.push(GridChange::Split {
                    parent: zone,
                    children,
                });
            }
        }

        for &zone in &leaves {
            let Some((a, b)) = self.mergeable_pair(zone) else {
                continue;
            };
            if let Ok(parent) = self.merge(a, b) {
                changes.push(GridChange::Merge {
                    parent,
                    retired: (a, b),
                });
            }
        }

        changes
    }

    /// The children of `zone`'s parent, if `zone` and its sibling are both current leaves at or below
    /// the underpopulation threshold.
    fn mergeable_pair(&self, zone: ZoneId) -> Option<(ZoneId, ZoneId)> {
        let this = self.current_leaf(zone).ok()?;
        let (a, b) = self.zones[this.parent?.index()].children?;
        let sibling = self.current_leaf(if a == zone { b } else { a }).ok()?;

        let under = self.config.underpopulation_threshold;
        if this.population <= under && sibling.population <= under {
            Some((a, b))
        } else {
            None
        }
    }

    /// The axis a split of `rect` would use: the one halving the longer side if both halves stay within
    /// the minimum dimensions, otherwise the other one, otherwise none.
    fn split_orientation(&self, rect: &Rect) -> Option<SplitOrientation> {
        let preferred = if rect.width >= rect.height {
            SplitOrientation::Horizontal
        } else {
            SplitOrientation::Vertical
        };
        [preferred, preferred.other()]
            .into_iter()
            .find(|orientation| match rect.halves(*orientation) {
                Some((first, second)) => self.satisfies_minimum(&first) && self.satisfies_minimum(&second),
                None => false,
            })
    }

    fn satisfies_minimum(&self, rect: &Rect) -> bool {
        rect.width >= self.config.minimum_zone_width && rect.height >= self.config.minimum_zone_height
    }

    /// Subdivide a current leaf into two new leaves, dealing its superpeers round-robin to them.
    pub fn split(&mut self, zone: ZoneId) -> Result<(ZoneId, ZoneId), ZoneGridError> {
        let parent = self.current_leaf(zone)?;
        let orientation = self
            .split_orientation(&parent.rect)
            .ok_or(ZoneGridError::ZoneTooSmall { zone })?;
        // Safety: split_orientation never returns SplitOrientation::None.
        let (first_rect, second_rect) = parent.rect.halves(orientation).unwrap();

        let first = ZoneId::new(self.zones.len() as u32);
        let second = ZoneId::new(first.int() + 1);
        let mut first_zone = Zone::leaf(first, Some(zone), first_rect);
        let mut second_zone = Zone::leaf(second, Some(zone), second_rect);

        let capacity = self.config.zone_superpeer_count as usize;
        let parent = &mut self.zones[zone.index()];
        for (i, slot) in parent.superpeers.drain(..).enumerate() {
            let child = if i % 2 == 0 {
                &mut first_zone
            } else {
                &mut second_zone
            };
            if child.superpeers.len() < capacity {
                child.superpeers.push(slot);
            }
        }
        parent.children = Some((first, second));
        parent.orientation = orientation;
        parent.population = 0;

        self.zones.push(first_zone);
        self.zones.push(second_zone);
        self.bump();

        Ok((first, second))
    }

    /// Fold two sibling leaves back into their parent.
    ///
    /// The parent takes the summed population and the union of both children's superpeers. When the
    /// union exceeds the per-zone count, the earliest-assigned superpeers (lowest ids) are kept.
    pub fn merge(&mut self, a: ZoneId, b: ZoneId) -> Result<ZoneId, ZoneGridError> {
        let zone_a = self.current_leaf(a)?;
        let zone_b = self.current_leaf(b)?;
        let parent = match (zone_a.parent, zone_b.parent) {
            (Some(pa), Some(pb)) if pa == pb && a != b => pa,
            _ => return Err(ZoneGridError::NotSiblings { a, b }),
        };

        let mut superpeers: Vec<SuperpeerSlot> = Vec::new();
        for slot in zone_a.superpeers.iter().chain(zone_b.superpeers.iter()) {
            if !superpeers.iter().any(|kept| kept.id == slot.id) {
                superpeers.push(slot.clone());
            }
        }
        superpeers.sort_by_key(|slot| slot.id);
        superpeers.truncate(self.config.zone_superpeer_count as usize);
        let population = zone_a.population.saturating_add(zone_b.population);

        for child in [a, b] {
            let child = &mut self.zones[child.index()];
            child.retired = true;
            child.population = 0;
            child.superpeers.clear();
        }

        let parent_zone = &mut self.zones[parent.index()];
        parent_zone.children = None;
        parent_zone.orientation = SplitOrientation::None;
        parent_zone.population = population;
        parent_zone.superpeers = superpeers;
        self.bump();

        Ok(parent)
    }

    /// Descend from the root to the current leaf containing `point`.
    pub fn lookup(&self, point: Point) -> Result<ZoneId, ZoneGridError> {
        let mut zone = self.root();
        if !zone.rect.contains(point) {
            return Err(ZoneGridError::OutOfBounds { point });
        }
        while let Some((first, second)) = zone.children {
            zone = if self.zones[first.index()].rect.contains(point) {
                &self.zones[first.index()]
            } else {
                &self.zones[second.index()]
            };
        }
        Ok(zone.id)
    }
}

/// Superpeer assignment.
impl ZoneGrid {
    /// Allocate a fresh superpeer id. Ids are never reused, so they also order superpeers by the time
    /// they were assigned.
    pub fn next_superpeer_id(&mut self) -> SuperpeerId {
        let id = SuperpeerId::new(self.next_superpeer_id);
        self.next_superpeer_id += 1;
        id
    }

    pub fn assign_superpeer(
        &mut self,
        zone: ZoneId,
        superpeer: SuperpeerId,
        client: ClientId,
        address: Address,
    ) -> Result<(), ZoneGridError> {
        let capacity = self.config.zone_superpeer_count as usize;
        let leaf = self.current_leaf_mut(zone)?;
        if leaf
            .superpeers
            .iter()
            .any(|slot| slot.id == superpeer || slot.client == client)
        {
            return Err(ZoneGridError::DuplicateSuperpeer { zone, superpeer });
        }
        if leaf.superpeers.len() >= capacity {
            return Err(ZoneGridError::ZoneFull { zone });
        }
        leaf.superpeers.push(SuperpeerSlot {
            id: superpeer,
            client,
            address,
        });
        self.bump();
        Ok(())
    }

    pub fn remove_superpeer(
        &mut self,
        zone: ZoneId,
        superpeer: SuperpeerId,
    ) -> Result<SuperpeerSlot, ZoneGridError> {
        let leaf = self.current_leaf_mut(zone)?;
        let position = leaf
            .superpeers
            .iter()
            .position(|slot| slot.id == superpeer)
            .ok_or(ZoneGridError::UnknownZone { zone })?;
        let removed = leaf.superpeers.remove(position);
        self.bump();
        Ok(removed)
    }

    /// Take every slot held by `client` away from it. Returns the zones and slots that were freed.
    pub fn remove_client_superpeers(&mut self, client: ClientId) -> Vec<(ZoneId, SuperpeerSlot)> {
        let mut removed = Vec::new();
        for zone in self.zones.iter_mut().filter(|zone| zone.is_current_leaf()) {
            let id = zone.id;
            zone.superpeers.retain(|slot| {
                if slot.client == client {
                    removed.push((id, slot.clone()));
                    false
                } else {
                    true
                }
            });
        }
        if !removed.is_empty() {
            self.bump();
        }
        removed
    }
}
