use hex_capture::{PixelPoint, PixelRect};
use hex_data::{CoreUpgradeType, Zone, ZoneLayout};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::hex_math::{axial_to_pixel, offset_to_axial, AxialCoordinate};
use crate::scale::ScaleEstimate;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    #[error("degenerate screenshot dimensions {width}x{height}")]
    DegenerateDimensions { width: u32, height: u32 },
    #[error("invalid scale factor {0}")]
    InvalidScale(f64),
    #[error("core slot {0} falls outside the screenshot")]
    CoreSlotOutOfFrame(String),
    #[error("layout produced no slots")]
    NoSlots,
    #[error("slots {a} and {b} overlap by {overlap_x:.1}x{overlap_y:.1} px")]
    Overlap {
        a: String,
        b: String,
        overlap_x: f64,
        overlap_y: f64,
    },
    #[error("duplicate slot id {0}")]
    DuplicateId(String),
}

/// Logical identity of an icon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotIdentity {
    Core(CoreUpgradeType),
    Regular(AxialCoordinate),
}

/// One icon's identity and pixel bounds within a screenshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeSlot {
    pub id: String,
    pub zone: Zone,
    pub identity: SlotIdentity,
    pub bounds: PixelRect,
    pub center: PixelPoint,
}

impl UpgradeSlot {
    fn new(identity: SlotIdentity, center: PixelPoint, side: f64) -> Self {
        let (id, zone) = match identity {
            SlotIdentity::Core(core) => (format!("core:{}", core.slug()), Zone::Core),
            SlotIdentity::Regular(axial) => (format!("regular:{}", axial), Zone::Regular),
        };
        Self {
            id,
            zone,
            identity,
            bounds: PixelRect::square_around(center, side),
            center,
        }
    }
}

/// Every expected slot of one screenshot, core zone first.
#[derive(Debug, Clone)]
pub struct CoordinateMap {
    width: u32,
    height: u32,
    scale: ScaleEstimate,
    regular_rows: u32,
    slots: Vec<UpgradeSlot>,
    index: HashMap<String, usize>,
}

impl CoordinateMap {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn scale(&self) -> &ScaleEstimate {
        &self.scale
    }

    pub fn slots(&self) -> &[UpgradeSlot] {
        &self.slots
    }

    pub fn get(&self, id: &str) -> Option<&UpgradeSlot> {
        self.index.get(id).map(|&i| &self.slots[i])
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn zone_slots(&self, zone: Zone) -> impl Iterator<Item = &UpgradeSlot> {
        self.slots.iter().filter(move |s| s.zone == zone)
    }

    /// Honeycomb rows that fit in the screenshot
    pub fn regular_rows(&self) -> u32 {
        self.regular_rows
    }

    pub fn core(&self, core: CoreUpgradeType) -> Option<&UpgradeSlot> {
        self.get(&format!("core:{}", core.slug()))
    }
}

/// Turns a scale estimate into per-icon pixel bounds for both zones.
#[derive(Debug, Clone)]
pub struct ZoneLayoutMapper {
    layout: ZoneLayout,
}

impl ZoneLayoutMapper {
    pub fn new(layout: ZoneLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ZoneLayout {
        &self.layout
    }

    /// Enumerate every slot. All slots for both zones, or an error.
    pub fn map(
        &self,
        estimate: &ScaleEstimate,
        width: u32,
        height: u32,
    ) -> Result<CoordinateMap, LayoutError> {
        if width == 0 || height == 0 {
            return Err(LayoutError::DegenerateDimensions { width, height });
        }
        let scale = estimate.scale_factor;
        if !(scale > 0.0) || !scale.is_finite() {
            return Err(LayoutError::InvalidScale(scale));
        }

        let (wf, hf) = (width as f64, height as f64);
        let hex_radius = self.layout.hex_radius * scale;
        let side = self.layout.icon_fill * SQRT_3 * hex_radius;
        let origin = estimate.grid_origin;

        let mut slots = Vec::new();

        // 1. Core zone: three fixed identities
        for core in CoreUpgradeType::ALL {
            let offset = self.layout.core_offsets.get(core);
            let center = origin.offset(offset.x * scale, offset.y * scale);
            let slot = UpgradeSlot::new(SlotIdentity::Core(core), center, side);
            if !slot.bounds.is_within(wf, hf) {
                return Err(LayoutError::CoreSlotOutOfFrame(slot.id));
            }
            slots.push(slot);
        }

        // 2. Regular zone: honeycomb rows until one leaves the frame
        let regular_origin = origin.offset(
            self.layout.regular_start_offset.x * scale,
            self.layout.regular_start_offset.y * scale,
        );
        let columns = self.layout.grid_width as i32;
        let first_column = -((columns - 1) / 2);

        let mut rows = 0u32;
        while rows < self.layout.max_rings {
            let row: Vec<UpgradeSlot> = (first_column..first_column + columns)
                .map(|column| {
                    let axial = offset_to_axial(column, rows as i32);
                    let center = axial_to_pixel(axial.q, axial.r, hex_radius, regular_origin);
                    UpgradeSlot::new(SlotIdentity::Regular(axial), center, side)
                })
                .collect();

            if let Some(outside) = row.iter().find(|s| !s.bounds.is_within(wf, hf)) {
                debug!(
                    "Row {} stops the honeycomb: {} at ({:.1}, {:.1}) leaves the frame",
                    rows, outside.id, outside.center.x, outside.center.y
                );
                break;
            }
            slots.extend(row);
            rows += 1;
        }

        if slots.is_empty() {
            return Err(LayoutError::NoSlots);
        }

        // 3. Structural invariants
        let mut index = HashMap::with_capacity(slots.len());
        for (i, slot) in slots.iter().enumerate() {
            if index.insert(slot.id.clone(), i).is_some() {
                return Err(LayoutError::DuplicateId(slot.id.clone()));
            }
        }
        self.check_overlap(&slots)?;

        info!(
            "Mapped {} slot(s): 3 core + {} regular ({} column(s) x {} row(s)) at scale {:.3}",
            slots.len(),
            slots.len() - 3,
            columns,
            rows,
            scale
        );

        Ok(CoordinateMap {
            width,
            height,
            scale: estimate.clone(),
            regular_rows: rows,
            slots,
            index,
        })
    }

    fn check_overlap(&self, slots: &[UpgradeSlot]) -> Result<(), LayoutError> {
        let margin = self.layout.overlap_margin;
        for (i, a) in slots.iter().enumerate() {
            for b in &slots[i + 1..] {
                let (ox, oy) = a.bounds.overlap_extent(&b.bounds);
                if ox > margin && oy > margin {
                    return Err(LayoutError::Overlap {
                        a: a.id.clone(),
                        b: b.id.clone(),
                        overlap_x: ox,
                        overlap_y: oy,
                    });
                }
            }
        }
        Ok(())
    }
}
