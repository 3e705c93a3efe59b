use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use storefront_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, StockLocationId, VariantId,
};
use storefront_events::Event;

use crate::backorder::{BackorderQueue, BackorderedUnit};

/// Stock item identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockItemId(pub AggregateId);

impl StockItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for StockItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// The (variant, location) pair a stock item is unique for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockItemKey {
    pub variant_id: VariantId,
    pub stock_location_id: StockLocationId,
}

impl StockItemKey {
    pub fn new(variant_id: VariantId, stock_location_id: StockLocationId) -> Self {
        Self {
            variant_id,
            stock_location_id,
        }
    }
}

impl core::fmt::Display for StockItemKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.variant_id, self.stock_location_id)
    }
}

/// Rejects a change that takes a non-backorderable item from a non-negative
/// count to a negative one.
///
/// Items that are already negative may keep moving in either direction.
pub fn validate_count_change(backorderable: bool, previous: i64, next: i64) -> DomainResult<()> {
    if !backorderable && previous >= 0 && next < 0 {
        return Err(DomainError::stock_integrity(format!(
            "count on hand cannot go from {previous} to {next} on a non-backorderable item"
        )));
    }
    Ok(())
}

/// Aggregate root: StockItem.
///
/// Serializable so stores that keep rows (rather than streams) can persist
/// the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    id: StockItemId,
    variant_id: VariantId,
    stock_location_id: StockLocationId,
    count_on_hand: i64,
    backorderable: bool,
    backorders: BackorderQueue,
    version: u64,
    created: bool,
    discarded: bool,
}

impl StockItem {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: StockItemId) -> Self {
        Self {
            id,
            variant_id: VariantId::from_uuid(Uuid::nil()),
            stock_location_id: StockLocationId::from_uuid(Uuid::nil()),
            count_on_hand: 0,
            backorderable: false,
            backorders: BackorderQueue::new(),
            version: 0,
            created: false,
            discarded: false,
        }
    }

    pub fn id_typed(&self) -> StockItemId {
        self.id
    }

    pub fn key(&self) -> StockItemKey {
        StockItemKey::new(self.variant_id, self.stock_location_id)
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn stock_location_id(&self) -> StockLocationId {
        self.stock_location_id
    }

    pub fn count_on_hand(&self) -> i64 {
        self.count_on_hand
    }

    pub fn is_backorderable(&self) -> bool {
        self.backorderable
    }

    pub fn backorders(&self) -> &BackorderQueue {
        &self.backorders
    }

    pub fn is_available(&self) -> bool {
        self.count_on_hand > 0 || self.backorderable
    }

    /// Created and not discarded.
    pub fn exists(&self) -> bool {
        self.created && !self.discarded
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }
}

impl AggregateRoot for StockItem {
    type Id = StockItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateStockItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateStockItem {
    pub stock_item_id: StockItemId,
    pub variant_id: VariantId,
    pub stock_location_id: StockLocationId,
    pub backorderable: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustCountOnHand (relative).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustCountOnHand {
    pub stock_item_id: StockItemId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetCountOnHand (absolute).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCountOnHand {
    pub stock_item_id: StockItemId,
    pub count_on_hand: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReduceCountOnHandToZero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceCountOnHandToZero {
    pub stock_item_id: StockItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetBackorderable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBackorderable {
    pub stock_item_id: StockItemId,
    pub backorderable: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: QueueBackorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueBackorder {
    pub stock_item_id: StockItemId,
    pub unit: BackorderedUnit,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DiscardStockItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscardStockItem {
    pub stock_item_id: StockItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    Create(CreateStockItem),
    Adjust(AdjustCountOnHand),
    Set(SetCountOnHand),
    ReduceToZero(ReduceCountOnHandToZero),
    SetBackorderable(SetBackorderable),
    QueueBackorder(QueueBackorder),
    Discard(DiscardStockItem),
}

impl StockCommand {
    pub fn stock_item_id(&self) -> StockItemId {
        match self {
            StockCommand::Create(c) => c.stock_item_id,
            StockCommand::Adjust(c) => c.stock_item_id,
            StockCommand::Set(c) => c.stock_item_id,
            StockCommand::ReduceToZero(c) => c.stock_item_id,
            StockCommand::SetBackorderable(c) => c.stock_item_id,
            StockCommand::QueueBackorder(c) => c.stock_item_id,
            StockCommand::Discard(c) => c.stock_item_id,
        }
    }
}

/// Event: StockItemCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItemCreated {
    pub stock_item_id: StockItemId,
    pub variant_id: VariantId,
    pub stock_location_id: StockLocationId,
    pub backorderable: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CountOnHandAdjusted. Carries the resulting count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountOnHandAdjusted {
    pub stock_item_id: StockItemId,
    pub delta: i64,
    pub count_on_hand: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CountOnHandSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountOnHandSet {
    pub stock_item_id: StockItemId,
    pub previous: i64,
    pub count_on_hand: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BackorderableChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackorderableChanged {
    pub stock_item_id: StockItemId,
    pub backorderable: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BackorderQueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackorderQueued {
    pub stock_item_id: StockItemId,
    pub unit: BackorderedUnit,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BackorderFilled. The unit left the queue and is now on hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackorderFilled {
    pub stock_item_id: StockItemId,
    pub unit_id: Uuid,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockItemDiscarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItemDiscarded {
    pub stock_item_id: StockItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    Created(StockItemCreated),
    Adjusted(CountOnHandAdjusted),
    Set(CountOnHandSet),
    BackorderableChanged(BackorderableChanged),
    BackorderQueued(BackorderQueued),
    BackorderFilled(BackorderFilled),
    Discarded(StockItemDiscarded),
}

impl StockEvent {
    pub fn stock_item_id(&self) -> StockItemId {
        match self {
            StockEvent::Created(e) => e.stock_item_id,
            StockEvent::Adjusted(e) => e.stock_item_id,
            StockEvent::Set(e) => e.stock_item_id,
            StockEvent::BackorderableChanged(e) => e.stock_item_id,
            StockEvent::BackorderQueued(e) => e.stock_item_id,
            StockEvent::BackorderFilled(e) => e.stock_item_id,
            StockEvent::Discarded(e) => e.stock_item_id,
        }
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::Created(_) => "inventory.stock_item.created",
            StockEvent::Adjusted(_) => "inventory.stock_item.count_adjusted",
            StockEvent::Set(_) => "inventory.stock_item.count_set",
            StockEvent::BackorderableChanged(_) => "inventory.stock_item.backorderable_changed",
            StockEvent::BackorderQueued(_) => "inventory.stock_item.backorder_queued",
            StockEvent::BackorderFilled(_) => "inventory.stock_item.backorder_filled",
            StockEvent::Discarded(_) => "inventory.stock_item.discarded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::Created(e) => e.occurred_at,
            StockEvent::Adjusted(e) => e.occurred_at,
            StockEvent::Set(e) => e.occurred_at,
            StockEvent::BackorderableChanged(e) => e.occurred_at,
            StockEvent::BackorderQueued(e) => e.occurred_at,
            StockEvent::BackorderFilled(e) => e.occurred_at,
            StockEvent::Discarded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockItem {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::Created(e) => {
                self.id = e.stock_item_id;
                self.variant_id = e.variant_id;
                self.stock_location_id = e.stock_location_id;
                self.backorderable = e.backorderable;
                self.count_on_hand = 0;
                self.created = true;
            }
            StockEvent::Adjusted(e) => {
                self.count_on_hand = e.count_on_hand;
            }
            StockEvent::Set(e) => {
                self.count_on_hand = e.count_on_hand;
            }
            StockEvent::BackorderableChanged(e) => {
                self.backorderable = e.backorderable;
            }
            StockEvent::BackorderQueued(e) => {
                self.backorders.push(e.unit.clone());
            }
            StockEvent::BackorderFilled(e) => {
                self.backorders.remove(e.unit_id);
            }
            StockEvent::Discarded(_) => {
                self.discarded = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !matches!(command, StockCommand::Create(_)) {
            self.ensure_exists()?;
        }
        self.ensure_item_id(command.stock_item_id())?;

        match command {
            StockCommand::Create(cmd) => self.handle_create(cmd),
            StockCommand::Adjust(cmd) => self.handle_adjust(cmd),
            StockCommand::Set(cmd) => self.handle_set(cmd),
            StockCommand::ReduceToZero(cmd) => self.handle_reduce_to_zero(cmd),
            StockCommand::SetBackorderable(cmd) => self.handle_set_backorderable(cmd),
            StockCommand::QueueBackorder(cmd) => self.handle_queue_backorder(cmd),
            StockCommand::Discard(cmd) => Ok(vec![StockEvent::Discarded(StockItemDiscarded {
                stock_item_id: cmd.stock_item_id,
                occurred_at: cmd.occurred_at,
            })]),
        }
    }
}

impl StockItem {
    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_item_id(&self, stock_item_id: StockItemId) -> Result<(), DomainError> {
        if self.id != stock_item_id {
            return Err(DomainError::invariant("stock_item_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateStockItem) -> Result<Vec<StockEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!("stock item {} already exists", self.id)));
        }
        Ok(vec![StockEvent::Created(StockItemCreated {
            stock_item_id: cmd.stock_item_id,
            variant_id: cmd.variant_id,
            stock_location_id: cmd.stock_location_id,
            backorderable: cmd.backorderable,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustCountOnHand) -> Result<Vec<StockEvent>, DomainError> {
        if cmd.delta == 0 {
            return Ok(Vec::new());
        }

        let next = self
            .count_on_hand
            .checked_add(cmd.delta)
            .ok_or_else(|| DomainError::validation("count on hand overflow"))?;
        validate_count_change(self.backorderable, self.count_on_hand, next)?;

        let mut events = vec![StockEvent::Adjusted(CountOnHandAdjusted {
            stock_item_id: cmd.stock_item_id,
            delta: cmd.delta,
            count_on_hand: next,
            occurred_at: cmd.occurred_at,
        })];

        if cmd.delta > 0 {
            // One unit of delta per waiting unit, oldest first.
            let fill = usize::try_from(cmd.delta).unwrap_or(usize::MAX);
            events.extend(self.backorders.oldest(fill).map(|unit| {
                StockEvent::BackorderFilled(BackorderFilled {
                    stock_item_id: cmd.stock_item_id,
                    unit_id: unit.unit_id,
                    order_id: unit.order_id,
                    occurred_at: cmd.occurred_at,
                })
            }));
        }

        Ok(events)
    }

    fn handle_set(&self, cmd: &SetCountOnHand) -> Result<Vec<StockEvent>, DomainError> {
        if cmd.count_on_hand == self.count_on_hand {
            return Ok(Vec::new());
        }
        validate_count_change(self.backorderable, self.count_on_hand, cmd.count_on_hand)?;
        Ok(vec![StockEvent::Set(CountOnHandSet {
            stock_item_id: cmd.stock_item_id,
            previous: self.count_on_hand,
            count_on_hand: cmd.count_on_hand,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reduce_to_zero(
        &self,
        cmd: &ReduceCountOnHandToZero,
    ) -> Result<Vec<StockEvent>, DomainError> {
        if self.count_on_hand <= 0 {
            return Ok(Vec::new());
        }
        Ok(vec![StockEvent::Set(CountOnHandSet {
            stock_item_id: cmd.stock_item_id,
            previous: self.count_on_hand,
            count_on_hand: 0,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_backorderable(
        &self,
        cmd: &SetBackorderable,
    ) -> Result<Vec<StockEvent>, DomainError> {
        if cmd.backorderable == self.backorderable {
            return Ok(Vec::new());
        }
        Ok(vec![StockEvent::BackorderableChanged(BackorderableChanged {
            stock_item_id: cmd.stock_item_id,
            backorderable: cmd.backorderable,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_queue_backorder(&self, cmd: &QueueBackorder) -> Result<Vec<StockEvent>, DomainError> {
        if !self.backorderable {
            return Err(DomainError::stock_integrity(format!(
                "stock item {} is not backorderable",
                self.id
            )));
        }
        if self.backorders.contains(cmd.unit.unit_id) {
            return Err(DomainError::conflict(format!(
                "unit {} is already backordered",
                cmd.unit.unit_id
            )));
        }
        Ok(vec![StockEvent::BackorderQueued(BackorderQueued {
            stock_item_id: cmd.stock_item_id,
            unit: cmd.unit.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
