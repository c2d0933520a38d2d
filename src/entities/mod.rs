pub mod cart;
pub mod cart_item;
pub mod product;
pub mod shopper;
pub mod store;
pub mod transaction;

pub use cart::Entity as Cart;
pub use cart_item::Entity as CartItem;
pub use product::Entity as Product;
pub use shopper::Entity as Shopper;
pub use store::Entity as Store;
pub use transaction::Entity as Transaction;

pub use cart::Model as CartModel;
pub use cart_item::Model as CartItemModel;
pub use product::Model as ProductModel;
pub use shopper::Model as ShopperModel;
pub use store::Model as StoreModel;
pub use transaction::Model as TransactionModel;
