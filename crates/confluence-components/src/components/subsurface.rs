//! Subsurface component
//!
//! A two-bucket soil scheme: a soil moisture store capped at a saturation
//! capacity, spilling excess as surface runoff, and an aquifer store
//! draining slowly to the rivers. Drainage from the soil stops below the
//! freezing temperature.

use confluence_core::component::{
    Category, Component, ComponentDefinition, ConstantSpec, FinaliseContext, InitialiseContext,
    InputSpec, InwardSpec, OutwardSpec, ParameterSpec, RunContext, RunOutput, StateSpec,
    TransferMethod,
};
use confluence_core::errors::ConfluenceResult;
use ndarray::{Array2, Ix2, Zip};

/// Saturation-excess soil moisture and a slow aquifer.
///
/// States:
/// - `soil_moisture`: water in the root zone (kg m-2)
/// - `aquifer`: groundwater store (kg m-2)
#[derive(Debug, Default)]
pub struct SoilBucket;

impl Component for SoilBucket {
    fn definition(&self) -> ComponentDefinition {
        let mut definition = ComponentDefinition::new(Category::SubSurface);
        definition.inwards = vec![
            InwardSpec::new(
                "throughfall",
                "kg m-2 s-1",
                Category::SurfaceLayer,
                TransferMethod::Mean,
            ),
            InwardSpec::new(
                "snowmelt",
                "kg m-2 s-1",
                Category::SurfaceLayer,
                TransferMethod::Mean,
            ),
            InwardSpec::new(
                "transpiration",
                "kg m-2 s-1",
                Category::SurfaceLayer,
                TransferMethod::Mean,
            ),
        ];
        definition.outwards = vec![
            OutwardSpec::new(
                "soil_water_stress",
                "1",
                &[Category::SurfaceLayer],
                TransferMethod::Mean,
            ),
            OutwardSpec::new(
                "runoff",
                "kg m-2 s-1",
                &[Category::OpenWater],
                TransferMethod::Mean,
            ),
        ];
        definition.inputs = vec![InputSpec::dynamic("soil_temperature", "K")];
        definition.parameters =
            vec![ParameterSpec::new("saturation_capacity", "kg m-2").with_valid_range(0.0, 1.0e6)];
        definition.constants = vec![ConstantSpec::new("freezing_temperature", "K", 273.0)];
        definition.states = vec![
            StateSpec::new("soil_moisture", "kg m-2"),
            StateSpec::new("aquifer", "kg m-2"),
        ];
        definition
    }

    fn initialise(&mut self, ctx: InitialiseContext) -> ConfluenceResult<()> {
        if !ctx.initialised_states {
            ctx.states.get_mut("soil_moisture").fill_timestep(-1, 3.0e2);
            ctx.states.get_mut("aquifer").fill_timestep(-1, 1.0e3);
        }
        Ok(())
    }

    fn run(&mut self, ctx: RunContext) -> ConfluenceResult<RunOutput> {
        let dt = ctx.step_seconds as f64;
        let throughfall = ctx.inwards.get("throughfall");
        let snowmelt = ctx.inwards.get("snowmelt");
        let soil_temperature = ctx.inputs.get("soil_temperature");
        let capacity = ctx.parameters.get("saturation_capacity");
        let freezing = ctx.constants.get("freezing_temperature");

        let moisture_before = ctx
            .states
            .get("soil_moisture")
            .get_timestep(-1)
            .to_owned()
            .into_dimensionality::<Ix2>()
            .expect("soil moisture is grid-shaped");
        let aquifer_before = ctx
            .states
            .get("aquifer")
            .get_timestep(-1)
            .to_owned()
            .into_dimensionality::<Ix2>()
            .expect("aquifer is grid-shaped");

        let mut soil_water = &moisture_before + &((throughfall + snowmelt) * dt);
        let mut surface_runoff = Array2::zeros(soil_water.dim());
        Zip::from(&mut surface_runoff)
            .and(&mut soil_water)
            .and(capacity)
            .for_each(|runoff, water, &cap| {
                if *water > cap {
                    *runoff = (*water - cap) / dt;
                    *water = cap;
                }
            });

        let mut soil_runoff = Array2::zeros(soil_water.dim());
        Zip::from(&mut soil_runoff)
            .and(soil_temperature)
            .and(&soil_water)
            .for_each(|runoff, &t, &water| {
                if t > freezing {
                    *runoff = water / dt * 0.1;
                }
            });
        let soil_moisture = &soil_water - &(&soil_runoff * dt);
        let soil_water_stress = &soil_moisture / capacity;

        let groundwater_runoff = &aquifer_before / dt * 0.05;
        let aquifer = &aquifer_before - &(&groundwater_runoff * dt);

        ctx.states
            .get_mut("soil_moisture")
            .set_timestep(0, &soil_moisture.into_dyn());
        ctx.states
            .get_mut("aquifer")
            .set_timestep(0, &aquifer.into_dyn());

        let mut output = RunOutput::default();
        output
            .outwards
            .insert("soil_water_stress".to_string(), soil_water_stress);
        output.outwards.insert(
            "runoff".to_string(),
            &(&surface_runoff + &soil_runoff) + &groundwater_runoff,
        );
        Ok(output)
    }

    fn finalise(&mut self, _ctx: FinaliseContext) -> ConfluenceResult<()> {
        Ok(())
    }
}
