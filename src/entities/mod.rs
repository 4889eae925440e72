//! SeaORM entity definitions for the storefront schema.

pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod customer;
pub mod order;
pub mod order_item;
pub mod order_status_history;
pub mod payment;
pub mod product;

pub use cart::Entity as Cart;
pub use cart_item::Entity as CartItem;
pub use coupon::Entity as Coupon;
pub use customer::Entity as Customer;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use order_status_history::Entity as OrderStatusHistory;
pub use payment::Entity as Payment;
pub use product::Entity as Product;
