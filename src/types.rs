/// System-assigned integer identifier standing in for a natural key.
/// Example: `1`, `2`, `17`
pub type SurrogateId = u64;
/// Zero-based position of a fact row within its Record Set.
/// Example: `0` is the first data row of the loaded CSV.
pub type RowIndex = usize;
/// Source order identifier carried through normalization unchanged.
/// Example: `48883` (`Global_Orders_ID`), or the 1-based data row number when absent.
pub type OrderId = u64;
/// One component of a natural-key tuple.
/// Examples: `Furniture`, `Tokyo`, `Office Chair`
pub type KeyPart = String;
/// Table name used in invariant and store error context.
/// Examples: `customer`, `orders`
pub type TableName = String;
