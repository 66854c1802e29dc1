use std::collections::HashMap;
use std::sync::Arc;

use crate::application::UnmountCallback;
use crate::observable::Observable;

/// Named chrome slots an application may render into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlRegion {
    Left,
    Center,
    Right,
    Badge,
    Description,
    Bottom,
}

impl ControlRegion {
    pub const ALL: [ControlRegion; 6] = [
        ControlRegion::Left,
        ControlRegion::Center,
        ControlRegion::Right,
        ControlRegion::Badge,
        ControlRegion::Description,
        ControlRegion::Bottom,
    ];
}

/// Renders into the element identified by the argument and returns its teardown.
pub type MountPoint = Arc<dyn Fn(&str) -> UnmountCallback + Send + Sync>;

/// One observable mount point per region. Cloning shares the slots.
#[derive(Clone)]
pub struct AppControls {
    regions: Arc<HashMap<ControlRegion, Observable<Option<MountPoint>>>>,
}

impl AppControls {
    pub fn new() -> Self {
        let regions = ControlRegion::ALL
            .into_iter()
            .map(|region| (region, Observable::new(None)))
            .collect();
        Self {
            regions: Arc::new(regions),
        }
    }

    pub fn set(&self, region: ControlRegion, mount_point: MountPoint) {
        if let Some(slot) = self.regions.get(&region) {
            slot.next(Some(mount_point));
        }
    }

    pub fn clear(&self, region: ControlRegion) {
        if let Some(slot) = self.regions.get(&region) {
            if slot.get().is_some() {
                slot.next(None);
            }
        }
    }

    pub fn clear_all(&self) {
        for region in ControlRegion::ALL {
            self.clear(region);
        }
    }

    pub fn get(&self, region: ControlRegion) -> Option<MountPoint> {
        self.regions.get(&region).and_then(Observable::get)
    }

    pub fn observe(&self, region: ControlRegion) -> Observable<Option<MountPoint>> {
        self.regions
            .get(&region)
            .cloned()
            .unwrap_or_else(|| Observable::new(None))
    }

    pub(crate) fn complete(&self) {
        for slot in self.regions.values() {
            slot.complete();
        }
    }
}

impl Default for AppControls {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AppControls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let occupied: Vec<ControlRegion> = ControlRegion::ALL
            .into_iter()
            .filter(|region| self.get(*region).is_some())
            .collect();
        f.debug_struct("AppControls")
            .field("occupied", &occupied)
            .finish()
    }
}
