use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::dimension::Dimension;

pub use crate::types::{OrderId, RowIndex, SurrogateId};

/// Named source column of the denormalized order dataset.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Column {
    /// `Global_Orders_ID`.
    OrderId,
    /// `Order_Date`.
    OrderDate,
    /// `Ship_Date`.
    ShipDate,
    /// `Order_Priority`.
    OrderPriority,
    /// `Ship_Mode`.
    ShipMode,
    /// `Discount`.
    Discount,
    /// `Profit`.
    Profit,
    /// `Quantity`.
    Quantity,
    /// `Sales`.
    Sales,
    /// `Shipping_Cost`.
    ShippingCost,
    /// `Customer_Name`.
    CustomerName,
    /// `Product_Name`.
    ProductName,
    /// `Category`.
    Category,
    /// `Sub_Category`.
    SubCategory,
    /// `Region`.
    Region,
    /// `City`.
    City,
    /// `Country`.
    Country,
    /// `State`.
    State,
    /// `Market`.
    Market,
    /// `Segment`.
    Segment,
}

/// Value shape of a column after type coercion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    /// Order identifier.
    Identifier,
    /// Date or date-time.
    Date,
    /// Free text, capped per column.
    Text,
    /// Floating-point measure.
    Number,
    /// Whole-number measure.
    Integer,
}

impl Column {
    /// Every column in CSV header order.
    pub const ALL: [Column; 20] = [
        Column::OrderId,
        Column::OrderDate,
        Column::ShipDate,
        Column::OrderPriority,
        Column::ShipMode,
        Column::Discount,
        Column::Profit,
        Column::Quantity,
        Column::Sales,
        Column::ShippingCost,
        Column::CustomerName,
        Column::ProductName,
        Column::Category,
        Column::SubCategory,
        Column::Region,
        Column::City,
        Column::Country,
        Column::State,
        Column::Market,
        Column::Segment,
    ];

    /// CSV header used for this column.
    pub const fn header(self) -> &'static str {
        match self {
            Column::OrderId => "Global_Orders_ID",
            Column::OrderDate => "Order_Date",
            Column::ShipDate => "Ship_Date",
            Column::OrderPriority => "Order_Priority",
            Column::ShipMode => "Ship_Mode",
            Column::Discount => "Discount",
            Column::Profit => "Profit",
            Column::Quantity => "Quantity",
            Column::Sales => "Sales",
            Column::ShippingCost => "Shipping_Cost",
            Column::CustomerName => "Customer_Name",
            Column::ProductName => "Product_Name",
            Column::Category => "Category",
            Column::SubCategory => "Sub_Category",
            Column::Region => "Region",
            Column::City => "City",
            Column::Country => "Country",
            Column::State => "State",
            Column::Market => "Market",
            Column::Segment => "Segment",
        }
    }

    /// Resolve a CSV header back to its column.
    pub fn from_header(header: &str) -> Option<Self> {
        let header = header.trim();
        Self::ALL.into_iter().find(|column| column.header() == header)
    }

    /// Value shape of this column.
    pub const fn kind(self) -> ColumnKind {
        match self {
            Column::OrderId => ColumnKind::Identifier,
            Column::OrderDate | Column::ShipDate => ColumnKind::Date,
            Column::Discount | Column::Profit | Column::Sales | Column::ShippingCost => {
                ColumnKind::Number
            }
            Column::Quantity => ColumnKind::Integer,
            _ => ColumnKind::Text,
        }
    }

    /// True for columns holding free text (dimension attributes and order labels).
    pub const fn is_text(self) -> bool {
        matches!(self.kind(), ColumnKind::Text)
    }

    /// Dimension whose entries own this attribute after normalization, if any.
    ///
    /// Market and segment resolve through the customer association but are
    /// reported as their own dimensions.
    pub const fn dimension(self) -> Option<Dimension> {
        match self {
            Column::Category => Some(Dimension::Category),
            Column::SubCategory => Some(Dimension::SubCategory),
            Column::Market => Some(Dimension::Market),
            Column::Segment => Some(Dimension::Segment),
            Column::CustomerName => Some(Dimension::Customer),
            Column::ProductName => Some(Dimension::Product),
            Column::Region | Column::City | Column::Country | Column::State => {
                Some(Dimension::Location)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// Typed cell value used for comparison and diff reporting.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// No value.
    Null,
    /// Identifier or integer measure; compared exactly.
    Integer(i64),
    /// Floating-point measure; compared with tolerance.
    Number(f64),
    /// Calendar date.
    Date(NaiveDate),
    /// Date with time-of-day.
    DateTime(NaiveDateTime),
    /// Text value.
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("<null>"),
            FieldValue::Integer(value) => write!(f, "{value}"),
            FieldValue::Number(value) => write!(f, "{value}"),
            FieldValue::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
            FieldValue::DateTime(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S")),
            FieldValue::Text(value) => write!(f, "{value:?}"),
        }
    }
}

/// One fully typed row of the denormalized source dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    /// Source order identifier (carried through unchanged).
    pub order_id: OrderId,
    /// Date the order was placed.
    pub order_date: NaiveDateTime,
    /// Date the order shipped.
    pub ship_date: NaiveDateTime,
    /// Priority label, e.g. `Critical`.
    pub order_priority: String,
    /// Shipping class, e.g. `Second Class`.
    pub ship_mode: String,
    /// Discount as a fraction of list price.
    pub discount: f64,
    /// Profit amount (may be negative).
    pub profit: f64,
    /// Units ordered.
    pub quantity: i64,
    /// Sales amount.
    pub sales: f64,
    /// Shipping cost.
    pub shipping_cost: f64,
    /// Customer natural key.
    pub customer_name: String,
    /// Product natural key.
    pub product_name: String,
    /// Product category as written in the row.
    pub category: String,
    /// Product sub-category as written in the row.
    pub sub_category: String,
    /// Location key part 1 of 4.
    pub region: String,
    /// Location key part 2 of 4.
    pub city: String,
    /// Location key part 3 of 4 (aliases expanded at load).
    pub country: String,
    /// Location key part 4 of 4.
    pub state: String,
    /// Customer market (first-seen per customer).
    pub market: String,
    /// Customer segment (first-seen per customer).
    pub segment: String,
}

impl FactRecord {
    /// Borrow a text column; `None` for non-text columns.
    pub fn text(&self, column: Column) -> Option<&str> {
        let value = match column {
            Column::OrderPriority => &self.order_priority,
            Column::ShipMode => &self.ship_mode,
            Column::CustomerName => &self.customer_name,
            Column::ProductName => &self.product_name,
            Column::Category => &self.category,
            Column::SubCategory => &self.sub_category,
            Column::Region => &self.region,
            Column::City => &self.city,
            Column::Country => &self.country,
            Column::State => &self.state,
            Column::Market => &self.market,
            Column::Segment => &self.segment,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// Text value usable as a natural-key part; blank text counts as null.
    pub fn key_part(&self, column: Column) -> Option<&str> {
        self.text(column).filter(|value| !value.trim().is_empty())
    }

    /// Mutable access to a text column, used by ingestion normalization.
    pub fn text_mut(&mut self, column: Column) -> Option<&mut String> {
        let value = match column {
            Column::OrderPriority => &mut self.order_priority,
            Column::ShipMode => &mut self.ship_mode,
            Column::CustomerName => &mut self.customer_name,
            Column::ProductName => &mut self.product_name,
            Column::Category => &mut self.category,
            Column::SubCategory => &mut self.sub_category,
            Column::Region => &mut self.region,
            Column::City => &mut self.city,
            Column::Country => &mut self.country,
            Column::State => &mut self.state,
            Column::Market => &mut self.market,
            Column::Segment => &mut self.segment,
            _ => return None,
        };
        Some(value)
    }

    /// Typed value of `column`.
    pub fn value(&self, column: Column) -> FieldValue {
        match column {
            Column::OrderId => FieldValue::Integer(self.order_id as i64),
            Column::OrderDate => FieldValue::DateTime(self.order_date),
            Column::ShipDate => FieldValue::DateTime(self.ship_date),
            Column::Discount => FieldValue::Number(self.discount),
            Column::Profit => FieldValue::Number(self.profit),
            Column::Quantity => FieldValue::Integer(self.quantity),
            Column::Sales => FieldValue::Number(self.sales),
            Column::ShippingCost => FieldValue::Number(self.shipping_cost),
            text_column => match self.key_part(text_column) {
                Some(value) => FieldValue::Text(value.to_string()),
                None => FieldValue::Null,
            },
        }
    }
}

/// In-memory, ordered batch of fact rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordSet {
    records: Vec<FactRecord>,
}

impl RecordSet {
    /// Create an empty record set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append one row at the end of the batch.
    pub fn push(&mut self, record: FactRecord) {
        self.records.push(record);
    }

    /// Rows in source order.
    pub fn records(&self) -> &[FactRecord] {
        &self.records
    }

    /// Iterate rows with their row index.
    pub fn iter(&self) -> impl Iterator<Item = (RowIndex, &FactRecord)> {
        self.records.iter().enumerate()
    }

    /// Consume the set, returning the rows.
    pub fn into_records(self) -> Vec<FactRecord> {
        self.records
    }
}

impl From<Vec<FactRecord>> for RecordSet {
    fn from(records: Vec<FactRecord>) -> Self {
        Self { records }
    }
}

impl FromIterator<FactRecord> for RecordSet {
    fn from_iter<I: IntoIterator<Item = FactRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

/// Dimensions referenced directly by every normalized fact.
pub const FACT_DIMENSIONS: [Dimension; 5] = [
    Dimension::Category,
    Dimension::SubCategory,
    Dimension::Customer,
    Dimension::Product,
    Dimension::Location,
];

/// Surrogate foreign keys attached to a normalized fact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeys {
    /// Category id.
    pub category_id: SurrogateId,
    /// Sub-category id.
    pub sub_category_id: SurrogateId,
    /// Customer id; market and segment hang off the customer.
    pub customer_id: SurrogateId,
    /// Product id.
    pub product_id: SurrogateId,
    /// Location id.
    pub location_id: SurrogateId,
}

impl ForeignKeys {
    /// Foreign key pointing into `dimension`, if facts reference it directly.
    pub fn get(&self, dimension: Dimension) -> Option<SurrogateId> {
        match dimension {
            Dimension::Category => Some(self.category_id),
            Dimension::SubCategory => Some(self.sub_category_id),
            Dimension::Customer => Some(self.customer_id),
            Dimension::Product => Some(self.product_id),
            Dimension::Location => Some(self.location_id),
            Dimension::Market | Dimension::Segment => None,
        }
    }

    /// All foreign keys paired with their dimension.
    pub fn iter(&self) -> impl Iterator<Item = (Dimension, SurrogateId)> + '_ {
        FACT_DIMENSIONS
            .into_iter()
            .filter_map(|dimension| self.get(dimension).map(|id| (dimension, id)))
    }
}

/// A fact row whose dimension natural keys were replaced by surrogate ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFact {
    /// Source order identifier.
    pub order_id: OrderId,
    /// Order date.
    pub order_date: NaiveDateTime,
    /// Ship date.
    pub ship_date: NaiveDateTime,
    /// Priority label.
    pub order_priority: String,
    /// Shipping class.
    pub ship_mode: String,
    /// Discount fraction.
    pub discount: f64,
    /// Profit amount.
    pub profit: f64,
    /// Units ordered.
    pub quantity: i64,
    /// Sales amount.
    pub sales: f64,
    /// Shipping cost.
    pub shipping_cost: f64,
    /// Surrogate foreign keys into the fact dimensions.
    pub keys: ForeignKeys,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> FactRecord {
        let date = NaiveDate::from_ymd_opt(2020, 1, 5)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        FactRecord {
            order_id: 1,
            order_date: date,
            ship_date: date,
            order_priority: "High".into(),
            ship_mode: "Second Class".into(),
            discount: 0.1,
            profit: 12.5,
            quantity: 2,
            sales: 120.0,
            shipping_cost: 8.25,
            customer_name: "Alice".into(),
            product_name: "Office Chair".into(),
            category: "Furniture".into(),
            sub_category: "Chairs".into(),
            region: "East".into(),
            city: "Tokyo".into(),
            country: "Japan".into(),
            state: "   ".into(),
            market: "APAC".into(),
            segment: "Consumer".into(),
        }
    }

    #[test]
    fn headers_round_trip_through_from_header() {
        for column in Column::ALL {
            assert_eq!(Column::from_header(column.header()), Some(column));
        }
        assert_eq!(Column::from_header("Row_ID"), None);
    }

    #[test]
    fn blank_text_is_not_a_key_part() {
        let record = sample_record();
        assert_eq!(record.key_part(Column::City), Some("Tokyo"));
        assert_eq!(record.key_part(Column::State), None);
        assert_eq!(record.key_part(Column::Sales), None);
        assert_eq!(record.value(Column::State), FieldValue::Null);
        assert_eq!(record.value(Column::Quantity), FieldValue::Integer(2));
    }

    #[test]
    fn location_columns_belong_to_location_dimension() {
        for column in [Column::Region, Column::City, Column::Country, Column::State] {
            assert_eq!(column.dimension(), Some(Dimension::Location));
        }
        assert_eq!(Column::Sales.dimension(), None);
    }

    #[test]
    fn foreign_keys_skip_indirect_dimensions() {
        let keys = ForeignKeys {
            category_id: 1,
            sub_category_id: 2,
            customer_id: 3,
            product_id: 4,
            location_id: 5,
        };
        assert_eq!(keys.get(Dimension::Market), None);
        let collected: Vec<_> = keys.iter().collect();
        assert_eq!(collected.len(), 5);
        assert_eq!(collected[2], (Dimension::Customer, 3));
    }
}
